//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use arrrg_derive::CommandLine;
use utf8path::Path;

use crate::client::ClientConfig;
use crate::error::{Error, Result};

/// File name of the device store under the user's home directory.
const DEVICE_STORE_FILE: &str = ".casebreaker-device.json";

/// Command-line arguments for the casebreaker-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Case study to discuss.
    #[arrrg(optional, "Case study to discuss", "ID")]
    pub case_study: Option<u32>,

    /// Existing session to continue.
    #[arrrg(optional, "Continue an existing session", "ID")]
    pub session: Option<u32>,

    /// Checkpoint to tag messages with.
    #[arrrg(optional, "Checkpoint to tag messages with (default: first)", "CHECKPOINT")]
    pub checkpoint: Option<String>,

    /// Server root.
    #[arrrg(optional, "Server URL (default: $CASEBREAKER_API_URL or http://localhost:8000)", "URL")]
    pub base_url: Option<String>,

    /// YAML file with client settings.
    #[arrrg(optional, "YAML file with client settings", "FILE")]
    pub config: Option<String>,

    /// Where the device identifier is kept.
    #[arrrg(optional, "Device identifier file (default: ~/.casebreaker-device.json)", "FILE")]
    pub device_store: Option<String>,

    /// Reuse this device's latest session for the case study.
    #[arrrg(flag, "Resume this device's latest session for the case study")]
    pub resume: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatConfig {
    /// Case study to start a session on.
    pub case_study_id: Option<i64>,

    /// Session to continue instead of starting one.
    pub session_id: Option<i64>,

    /// Checkpoint to tag messages with; the case study's first when unset.
    pub checkpoint_id: Option<String>,

    /// Server root overriding the client settings.
    pub base_url: Option<String>,

    /// YAML file with client settings.
    pub client_config_path: Option<String>,

    /// Where the device identifier is kept.
    pub device_store_path: Option<String>,

    /// Reuse this device's latest session for the case study.
    pub resume: bool,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - No case study or session
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            use_color: true,
            ..Self::default()
        }
    }

    /// Sets the case study.
    pub fn with_case_study(mut self, case_study_id: i64) -> Self {
        self.case_study_id = Some(case_study_id);
        self
    }

    /// Sets the session to continue.
    pub fn with_session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the checkpoint.
    pub fn with_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Sets the server root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the client settings file.
    pub fn with_client_config_path(mut self, path: impl Into<String>) -> Self {
        self.client_config_path = Some(path.into());
        self
    }

    /// Sets the device store file.
    pub fn with_device_store_path(mut self, path: impl Into<String>) -> Self {
        self.device_store_path = Some(path.into());
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Check that the configuration names something to talk about.
    pub fn validate(&self) -> Result<()> {
        if self.case_study_id.is_none() && self.session_id.is_none() {
            return Err(Error::validation(
                "either --case-study or --session is required",
                Some("case_study".to_string()),
            ));
        }
        if self.resume && self.case_study_id.is_none() {
            return Err(Error::validation(
                "--resume requires --case-study",
                Some("resume".to_string()),
            ));
        }
        Ok(())
    }

    /// Resolve client settings: the settings file (or the environment),
    /// then the base URL override.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.client_config_path {
            Some(path) => ClientConfig::from_yaml_file(&Path::from(path.as_str()))?,
            None => ClientConfig::from_env(),
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        Ok(config)
    }

    /// The device store file, defaulting to one in the home directory.
    pub fn device_store_path(&self) -> Path<'static> {
        match &self.device_store_path {
            Some(path) => Path::from(path.clone()),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                Path::from(format!("{home}/{DEVICE_STORE_FILE}"))
            }
        }
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        ChatConfig {
            case_study_id: args.case_study.map(i64::from),
            session_id: args.session.map(i64::from),
            checkpoint_id: args.checkpoint,
            base_url: args.base_url,
            client_config_path: args.config,
            device_store_path: args.device_store,
            resume: args.resume,
            use_color: !args.no_color,
        }
    }
}
