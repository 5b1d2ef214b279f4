use serde::Serialize;

/// Result contract shared by every hall action, whichever path served it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl<E: std::fmt::Display> From<Result<String, E>> for CommandOutcome {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownStep {
    Stop,
    LampOff,
    Clear,
    LightsOn,
}

impl ShutdownStep {
    pub const ORDER: [ShutdownStep; 4] = [
        ShutdownStep::Stop,
        ShutdownStep::LampOff,
        ShutdownStep::Clear,
        ShutdownStep::LightsOn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::LampOff => "lamp_off",
            Self::Clear => "clear",
            Self::LightsOn => "lights_on",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step: ShutdownStep,
    pub success: bool,
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub success: bool,
    pub steps: Vec<StepOutcome>,
}

impl ShutdownReport {
    pub fn from_steps(steps: Vec<StepOutcome>) -> Self {
        let success = steps.iter().all(|s| s.success);
        Self { success, steps }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HallSummary {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub tms_id: String,
    pub protocol: String,
    pub cp750_id: Option<String>,
    pub connected: bool,
    pub ack_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_error_uses_display_text() {
        let res: Result<String, &str> = Err("not connected");
        assert_eq!(CommandOutcome::from(res), CommandOutcome::failed("not connected"));
    }

    #[test]
    fn report_success_is_conjunction_of_steps() {
        let steps = ShutdownStep::ORDER
            .iter()
            .map(|step| StepOutcome {
                step: *step,
                success: *step != ShutdownStep::Clear,
                response: String::new(),
            })
            .collect();
        assert!(!ShutdownReport::from_steps(steps).success);
        assert!(ShutdownReport::from_steps(Vec::new()).success);
    }

    #[test]
    fn steps_serialize_as_snake_case() {
        let json = serde_json::to_value(ShutdownStep::LightsOn).unwrap();
        assert_eq!(json, "lights_on");
        assert_eq!(ShutdownStep::LampOff.as_str(), "lamp_off");
    }
}
