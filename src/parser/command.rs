//! Launch description of the external entry parser

use super::BridgeError;
use crate::config::ParserConfig;
use std::path::PathBuf;

/// Program, arguments and required files of the external parser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Files that must exist before the process is started
    pub required_files: Vec<PathBuf>,
}

impl ParserCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            required_files: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Require a file to exist at spawn time
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.required_files.push(path.into());
        self
    }

    /// `python3 <path>/parse.py --training <training>`
    pub fn from_config(config: &ParserConfig) -> Self {
        let script = config.path.join("parse.py");

        Self::new(config.interpreter.clone())
            .with_arg(script.to_string_lossy())
            .with_arg("--training")
            .with_arg(config.training.to_string_lossy())
            .with_required_file(script)
            .with_required_file(config.training.clone())
    }

    /// Fail fast when the script or its training data is missing
    pub fn check_resources(&self) -> Result<(), BridgeError> {
        for path in &self.required_files {
            if !path.exists() {
                return Err(BridgeError::ProcessStart {
                    program: self.program.clone(),
                    reason: format!("required file does not exist: {}", path.display()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config() {
        let config = ParserConfig {
            path: PathBuf::from("/opt/entry-parser"),
            training: PathBuf::from("/opt/training.csv"),
            ..ParserConfig::default()
        };

        let command = ParserCommand::from_config(&config);
        assert_eq!(command.program, "python3");
        assert_eq!(
            command.args,
            vec!["/opt/entry-parser/parse.py", "--training", "/opt/training.csv"]
        );
        assert_eq!(command.required_files.len(), 2);
    }

    #[test]
    fn test_missing_resource() {
        let temp_dir = TempDir::new().unwrap();
        let present = temp_dir.path().join("parse.py");
        std::fs::write(&present, "").unwrap();

        let ok = ParserCommand::new("python3").with_required_file(&present);
        assert!(ok.check_resources().is_ok());

        let missing = ok.with_required_file(temp_dir.path().join("training.csv"));
        assert!(matches!(
            missing.check_resources(),
            Err(BridgeError::ProcessStart { .. })
        ));
    }
}
