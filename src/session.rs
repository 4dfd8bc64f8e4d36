use serde::{Deserialize, Serialize};

pub const DEFAULT_SIGN_IN_PATH: &str = "/api/auth/signin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Unauthenticated,
    Authenticated,
    Loading,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unauthenticated" => Some(Self::Unauthenticated),
            "authenticated" => Some(Self::Authenticated),
            "loading" => Some(Self::Loading),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Loading => "loading",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Open,
    SignIn { sign_in_path: String },
    Wait,
}

pub fn gate(status: SessionStatus, require_session: bool, sign_in_path: &str) -> Gate {
    if !require_session {
        return Gate::Open;
    }
    match status {
        SessionStatus::Authenticated => Gate::Open,
        SessionStatus::Loading => Gate::Wait,
        SessionStatus::Unauthenticated => Gate::SignIn {
            sign_in_path: sign_in_path.to_string(),
        },
    }
}

/// Methods that stay reachable without a session: the host needs them to
/// open a workspace, read its security settings, and report sign-in.
pub fn is_public_method(method: &str) -> bool {
    matches!(
        method,
        "health" | "workspace.select" | "session.get" | "session.set" | "setup.get"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_only_applies_when_required() {
        assert_eq!(gate(SessionStatus::Unauthenticated, false, "/x"), Gate::Open);
        assert_eq!(gate(SessionStatus::Loading, true, "/x"), Gate::Wait);
        assert_eq!(
            gate(SessionStatus::Unauthenticated, true, "/x"),
            Gate::SignIn {
                sign_in_path: "/x".into()
            }
        );
        assert_eq!(gate(SessionStatus::Authenticated, true, "/x"), Gate::Open);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(SessionStatus::parse("Authenticated"), Some(SessionStatus::Authenticated));
        assert_eq!(SessionStatus::parse("nope"), None);
    }
}
