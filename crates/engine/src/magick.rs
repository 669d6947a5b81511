use crate::{Dimensions, EngineError, ImageEngine};
use rust_decimal::Decimal;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// ImageMagick, either as the single `magick` binary or as the legacy
/// `convert` + `identify` pair.
#[derive(Debug, Clone)]
pub struct MagickEngine {
    tools: Tools,
    timeout: Duration,
}

#[derive(Debug, Clone)]
enum Tools {
    Magick(PathBuf),
    Legacy { convert: PathBuf, identify: PathBuf },
}

impl MagickEngine {
    /// Locates the tools on `PATH`. Failing here means no run should start.
    pub fn discover(timeout: Duration) -> Result<Self, EngineError> {
        let tools = if let Ok(magick) = which::which("magick") {
            Tools::Magick(magick)
        } else {
            match (which::which("convert"), which::which("identify")) {
                (Ok(convert), Ok(identify)) => Tools::Legacy { convert, identify },
                _ => {
                    return Err(EngineError::ToolUnavailable(
                        "need either 'magick' or 'convert' + 'identify' in PATH".into(),
                    ))
                }
            }
        };
        debug!(?tools, "image tools located");
        Ok(Self { tools, timeout })
    }

    fn convert_cmd(&self) -> (PathBuf, Vec<OsString>) {
        match &self.tools {
            Tools::Magick(p) => (p.clone(), vec![OsString::from("convert")]),
            Tools::Legacy { convert, .. } => (convert.clone(), vec![]),
        }
    }

    fn identify_cmd(&self) -> (PathBuf, Vec<OsString>) {
        match &self.tools {
            Tools::Magick(p) => (p.clone(), vec![OsString::from("identify")]),
            Tools::Legacy { identify, .. } => (identify.clone(), vec![]),
        }
    }

    async fn run(&self, program: PathBuf, args: Vec<OsString>) -> Result<Output, EngineError> {
        let name = program.display().to_string();
        debug!(program = %name, ?args, "running image tool");
        let mut cmd = Command::new(&program);
        cmd.args(&args).kill_on_drop(true);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(res) => res.map_err(|source| EngineError::Io {
                path: program.clone(),
                source,
            })?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    program: name,
                    after: self.timeout,
                })
            }
        };
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: name,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// ImageMagick geometry for a percentage, two decimals, half-even.
pub fn percent_arg(percent: Decimal) -> String {
    format!("{:.2}%", percent.round_dp(2))
}

pub fn resize_descriptor(percent: Decimal, quality: u8) -> String {
    format!("-resize {} -quality {}", percent_arg(percent), quality)
}

/// Parses the `%w %h` identify format. Anything other than exactly two
/// integers is rejected, including the concatenated records of a
/// multi-frame file.
pub fn parse_dimensions(stdout: &str) -> Result<Dimensions, EngineError> {
    let malformed = || EngineError::Parse(stdout.trim().to_string());
    let parts: Vec<&str> = stdout.split_whitespace().collect();
    let [w, h] = parts.as_slice() else {
        return Err(malformed());
    };
    let width = w.parse::<u32>().map_err(|_| malformed())?;
    let height = h.parse::<u32>().map_err(|_| malformed())?;
    Ok(Dimensions { width, height })
}

#[async_trait::async_trait]
impl ImageEngine for MagickEngine {
    async fn auto_orient(&self, src: &Path, dst: &Path) -> Result<(), EngineError> {
        let (program, mut args) = self.convert_cmd();
        args.extend([
            OsString::from(src),
            OsString::from("-auto-orient"),
            OsString::from(dst),
        ]);
        self.run(program, args).await?;
        Ok(())
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<Dimensions, EngineError> {
        let (program, mut args) = self.identify_cmd();
        args.extend([
            OsString::from("-format"),
            OsString::from("%w %h"),
            OsString::from(path),
        ]);
        let out = self.run(program, args).await?;
        parse_dimensions(&String::from_utf8_lossy(&out.stdout))
    }

    async fn resize_by_percentage(
        &self,
        src: &Path,
        dst: &Path,
        percent: Decimal,
        quality: u8,
    ) -> Result<String, EngineError> {
        let (program, mut args) = self.convert_cmd();
        args.extend([
            OsString::from(src),
            OsString::from("-resize"),
            OsString::from(percent_arg(percent)),
            OsString::from("-quality"),
            OsString::from(quality.to_string()),
            OsString::from(dst),
        ]);
        self.run(program, args).await?;
        Ok(resize_descriptor(percent, quality))
    }
}
