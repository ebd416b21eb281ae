//! Minimal CLI parsing for run mode overrides.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct CliOptions {
    /// One-shot mode: stage and transcode a single file, then exit.
    pub transcode: Option<PathBuf>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        let mut options = CliOptions::default();
        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--transcode" => {
                    if let Some(value) = args.next() {
                        options.transcode = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--transcode=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.transcode = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }
}
