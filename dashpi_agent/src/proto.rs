//! Client → agent request protocol for the `/ws` channel.
//!
//! Raw frames are `{"page": string, "do": string, "args": array}` with every
//! field optional. [`RawRequest::classify`] turns one into an [`Inbound`]
//! against the page that is currently active, so every command that reaches a
//! push task has already been validated.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    Stats,
    Process,
    Software,
    Service,
    Management,
}

impl Page {
    /// Accepts the page path with or without its leading slash.
    pub fn parse(s: &str) -> Option<Page> {
        match s.strip_prefix('/').unwrap_or(s) {
            "" => Some(Page::Stats),
            "process" => Some(Page::Process),
            "software" => Some(Page::Software),
            "service" => Some(Page::Service),
            "management" => Some(Page::Management),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Page::Stats => "/",
            Page::Process => "/process",
            Page::Software => "/software",
            Page::Service => "/service",
            Page::Management => "/management",
        }
    }

    /// Polling pages re-sample forever; the others push once and then wait
    /// for commands.
    pub fn is_polling(self) -> bool {
        matches!(self, Page::Stats | Page::Process)
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareAction {
    Install,
    Uninstall,
    Reinstall,
}

impl SoftwareAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SoftwareAction::Install => "install",
            SoftwareAction::Uninstall => "uninstall",
            SoftwareAction::Reinstall => "reinstall",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Reboot,
    Poweroff,
}

impl PowerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerAction::Reboot => "reboot",
            PowerAction::Poweroff => "poweroff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Terminate,
    Kill,
    Suspend,
    Resume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Software {
        action: SoftwareAction,
        args: Vec<String>,
    },
    Service {
        action: ServiceAction,
        unit: String,
    },
    Power(PowerAction),
    Signal {
        pid: u32,
        signal: ProcessSignal,
    },
}

/// What one inbound frame asks the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Switch(Page),
    /// Empty page and empty command: the client is still on its page.
    Reassert,
    Command(Command),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed request JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected binary frame on the control channel")]
    Binary,
    #[error("unknown page {0:?}")]
    UnknownPage(String),
    #[error("command {verb:?} is not valid on page {page}")]
    UnknownCommand { page: Page, verb: String },
    #[error("command {verb:?} needs arguments")]
    MissingArgument { verb: String },
    #[error("argument #{index} is not a string or number")]
    BadArgument { index: usize },
    #[error("command {0:?} sent with no active page")]
    NoActivePage(String),
    #[error("command {verb:?} targets {target} but {active} is active")]
    InactivePage {
        verb: String,
        target: Page,
        active: Page,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRequest {
    #[serde(default)]
    pub page: String,
    #[serde(default, rename = "do")]
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RawRequest {
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn classify(self, active: Option<Page>) -> Result<Inbound, DecodeError> {
        if self.action.is_empty() {
            if self.page.is_empty() {
                return Ok(Inbound::Reassert);
            }
            return Page::parse(&self.page)
                .map(Inbound::Switch)
                .ok_or(DecodeError::UnknownPage(self.page));
        }

        let active = active.ok_or_else(|| DecodeError::NoActivePage(self.action.clone()))?;
        if !self.page.is_empty() {
            let target =
                Page::parse(&self.page).ok_or_else(|| DecodeError::UnknownPage(self.page.clone()))?;
            if target != active {
                return Err(DecodeError::InactivePage {
                    verb: self.action,
                    target,
                    active,
                });
            }
        }

        let args = scalar_args(&self.args)?;
        let verb = self.action;
        let unknown = |verb: String| DecodeError::UnknownCommand { page: active, verb };

        let cmd = match active {
            Page::Software => {
                let action = match verb.as_str() {
                    "install" => SoftwareAction::Install,
                    "uninstall" => SoftwareAction::Uninstall,
                    "reinstall" => SoftwareAction::Reinstall,
                    _ => return Err(unknown(verb)),
                };
                // never run the tool bare
                if args.is_empty() {
                    return Err(DecodeError::MissingArgument { verb });
                }
                Command::Software { action, args }
            }
            Page::Service => {
                let action = match verb.as_str() {
                    "start" => ServiceAction::Start,
                    "stop" => ServiceAction::Stop,
                    "restart" => ServiceAction::Restart,
                    _ => return Err(unknown(verb)),
                };
                let unit = match args.into_iter().next() {
                    // a leading dash would reach systemctl as an option
                    Some(unit) if unit.is_empty() || unit.starts_with('-') => {
                        return Err(DecodeError::BadArgument { index: 0 })
                    }
                    Some(unit) => unit,
                    None => return Err(DecodeError::MissingArgument { verb }),
                };
                Command::Service { action, unit }
            }
            Page::Management => match verb.as_str() {
                "reboot" => Command::Power(PowerAction::Reboot),
                "poweroff" => Command::Power(PowerAction::Poweroff),
                _ => return Err(unknown(verb)),
            },
            Page::Process => {
                let signal = match verb.as_str() {
                    "terminate" => ProcessSignal::Terminate,
                    "kill" => ProcessSignal::Kill,
                    "suspend" => ProcessSignal::Suspend,
                    "resume" => ProcessSignal::Resume,
                    _ => return Err(unknown(verb)),
                };
                let pid = match args.first() {
                    Some(a) => a
                        .parse::<u32>()
                        .map_err(|_| DecodeError::BadArgument { index: 0 })?,
                    None => return Err(DecodeError::MissingArgument { verb }),
                };
                Command::Signal { pid, signal }
            }
            Page::Stats => return Err(unknown(verb)),
        };
        Ok(Inbound::Command(cmd))
    }
}

// Numbers keep their JSON spelling, so `7` and `"7"` reach the tool identically.
fn scalar_args(args: &[Value]) -> Result<Vec<String>, DecodeError> {
    args.iter()
        .enumerate()
        .map(|(index, v)| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(DecodeError::BadArgument { index }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(json: &str, active: Option<Page>) -> Result<Inbound, DecodeError> {
        RawRequest::decode(json)?.classify(active)
    }

    #[test]
    fn page_paths_parse_with_or_without_slash() {
        assert_eq!(Page::parse("/"), Some(Page::Stats));
        assert_eq!(Page::parse("/process"), Some(Page::Process));
        assert_eq!(Page::parse("software"), Some(Page::Software));
        assert_eq!(Page::parse("/management"), Some(Page::Management));
        assert_eq!(Page::parse("/service"), Some(Page::Service));
        assert!(!Page::Service.is_polling());
        assert_eq!(Page::parse("/browser"), None);
    }

    #[test]
    fn page_switch_and_reassert() {
        assert_eq!(
            classify(r#"{"page":"/process"}"#, None).unwrap(),
            Inbound::Switch(Page::Process)
        );
        assert_eq!(
            classify(r#"{"page":""}"#, Some(Page::Stats)).unwrap(),
            Inbound::Reassert
        );
        assert_eq!(classify("{}", None).unwrap(), Inbound::Reassert);
    }

    #[test]
    fn software_command_accepts_numeric_args() {
        let got = classify(r#"{"do":"install","args":[7, "23"]}"#, Some(Page::Software)).unwrap();
        assert_eq!(
            got,
            Inbound::Command(Command::Software {
                action: SoftwareAction::Install,
                args: vec!["7".into(), "23".into()],
            })
        );
    }

    #[test]
    fn software_command_without_args_is_rejected() {
        let err = classify(r#"{"do":"install"}"#, Some(Page::Software)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingArgument { .. }));
    }

    #[test]
    fn nested_args_are_rejected() {
        let err = classify(r#"{"do":"install","args":[1,{"x":2}]}"#, Some(Page::Software))
            .unwrap_err();
        assert!(matches!(err, DecodeError::BadArgument { index: 1 }));
    }

    #[test]
    fn power_verbs_only_on_management() {
        assert_eq!(
            classify(r#"{"do":"reboot"}"#, Some(Page::Management)).unwrap(),
            Inbound::Command(Command::Power(PowerAction::Reboot))
        );
        let err = classify(r#"{"do":"reboot"}"#, Some(Page::Software)).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand { .. }));
        let err = classify(r#"{"do":"format"}"#, Some(Page::Management)).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand { .. }));
    }

    #[test]
    fn signal_needs_numeric_pid() {
        assert_eq!(
            classify(r#"{"do":"kill","args":[42]}"#, Some(Page::Process)).unwrap(),
            Inbound::Command(Command::Signal {
                pid: 42,
                signal: ProcessSignal::Kill
            })
        );
        let err = classify(r#"{"do":"kill","args":["abc"]}"#, Some(Page::Process)).unwrap_err();
        assert!(matches!(err, DecodeError::BadArgument { index: 0 }));
    }

    #[test]
    fn service_command_takes_one_unit() {
        assert_eq!(
            classify(r#"{"do":"restart","args":["ssh"]}"#, Some(Page::Service)).unwrap(),
            Inbound::Command(Command::Service {
                action: ServiceAction::Restart,
                unit: "ssh".into(),
            })
        );
        let err = classify(r#"{"do":"stop"}"#, Some(Page::Service)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingArgument { .. }));
        let err = classify(r#"{"do":"stop","args":["--now"]}"#, Some(Page::Service)).unwrap_err();
        assert!(matches!(err, DecodeError::BadArgument { index: 0 }));
        let err = classify(r#"{"do":"mask","args":["ssh"]}"#, Some(Page::Service)).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownCommand { .. }));
    }

    #[test]
    fn command_without_active_page_is_rejected() {
        let err = classify(r#"{"do":"install","args":[1]}"#, None).unwrap_err();
        assert!(matches!(err, DecodeError::NoActivePage(_)));
    }

    #[test]
    fn command_naming_another_page_is_rejected() {
        let err = classify(
            r#"{"page":"/software","do":"install","args":[1]}"#,
            Some(Page::Stats),
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::InactivePage { .. }));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(matches!(
            RawRequest::decode("{page:").unwrap_err(),
            DecodeError::Json(_)
        ));
    }
}
