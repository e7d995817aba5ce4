//! Native vs. cross-compilation command wrapper.

use serde::{Deserialize, Serialize};

/// Toolchain wrapper chosen once per pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Toolchain {
    /// Host `cargo`, no target parameter.
    Native,

    /// `cross` with `--target <triple>` appended.
    Cross { target: String },
}

impl Toolchain {
    /// Program that runs build/test/bench/doc.
    pub fn program(&self) -> &'static str {
        match self {
            Toolchain::Native => "cargo",
            Toolchain::Cross { .. } => "cross",
        }
    }

    /// Target parameter appended after the subcommand.
    pub fn target_args(&self) -> Vec<String> {
        match self {
            Toolchain::Native => Vec::new(),
            Toolchain::Cross { target } => vec!["--target".to_string(), target.clone()],
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Toolchain::Native => None,
            Toolchain::Cross { target } => Some(target),
        }
    }

    /// `<program> <subcommand> -v [--target T] [extra...]`
    pub fn cargo_command(&self, subcommand: &str, extra: &[&str]) -> Vec<String> {
        let mut command = vec![
            self.program().to_string(),
            subcommand.to_string(),
            "-v".to_string(),
        ];
        command.extend(self.target_args());
        command.extend(extra.iter().map(|s| s.to_string()));
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_command_has_no_target() {
        let cmd = Toolchain::Native.cargo_command("build", &[]);
        assert_eq!(cmd, vec!["cargo", "build", "-v"]);
        assert!(Toolchain::Native.target().is_none());
    }

    #[test]
    fn test_cross_command_appends_target() {
        let tc = Toolchain::Cross {
            target: "aarch64-unknown-linux-gnu".to_string(),
        };
        let cmd = tc.cargo_command("bench", &["--", "--test"]);
        assert_eq!(
            cmd,
            vec![
                "cross",
                "bench",
                "-v",
                "--target",
                "aarch64-unknown-linux-gnu",
                "--",
                "--test"
            ]
        );
        assert_eq!(tc.target(), Some("aarch64-unknown-linux-gnu"));
    }
}
