use crate::jobs::{JobId, MediaFormat};

const SELECT_CALLBACK_PREFIX: &str = "fmt:";
const DISMISS_CALLBACK_PREFIX: &str = "cancel:";
const STOP_CALLBACK_PREFIX: &str = "stop:";

/// Payload carried by an inline keyboard button.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlAction {
    /// Format chosen on the prompt for the URL behind `token`.
    Select { format: MediaFormat, token: String },
    /// Cancel pressed on the format prompt.
    Dismiss { token: String },
    /// Cancel pressed on a running job's progress message.
    Stop { job_id: JobId },
}

pub fn build_select_callback(format: MediaFormat, token: &str) -> String {
    format!("{SELECT_CALLBACK_PREFIX}{}:{token}", format.callback_tag())
}

pub fn build_dismiss_callback(token: &str) -> String {
    format!("{DISMISS_CALLBACK_PREFIX}{token}")
}

pub fn build_stop_callback(job_id: &JobId) -> String {
    format!("{STOP_CALLBACK_PREFIX}{}", job_id.as_str())
}

pub fn parse_callback(data: &str) -> Option<ControlAction> {
    if let Some(payload) = data.strip_prefix(SELECT_CALLBACK_PREFIX) {
        let mut parts = payload.splitn(2, ':');
        let format = MediaFormat::from_callback_tag(parts.next()?.trim())?;
        let token = parts.next()?.trim();
        if token.is_empty() {
            return None;
        }
        return Some(ControlAction::Select {
            format,
            token: token.to_string(),
        });
    }
    if let Some(payload) = data.strip_prefix(DISMISS_CALLBACK_PREFIX) {
        let token = payload.trim();
        if token.is_empty() {
            return None;
        }
        return Some(ControlAction::Dismiss {
            token: token.to_string(),
        });
    }
    let job_id = data.strip_prefix(STOP_CALLBACK_PREFIX)?.trim();
    if job_id.is_empty() {
        return None;
    }
    Some(ControlAction::Stop {
        job_id: JobId::from_raw(job_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_callback_roundtrip() {
        let data = build_select_callback(MediaFormat::Audio, "aD92PWRRdzR3OVdnWGNR");
        assert_eq!(
            parse_callback(&data),
            Some(ControlAction::Select {
                format: MediaFormat::Audio,
                token: "aD92PWRRdzR3OVdnWGNR".into()
            })
        );
    }

    #[test]
    fn stop_callback_keeps_negative_chat_ids() {
        let id = JobId::from_raw("-100123_1700000000000");
        let data = build_stop_callback(&id);
        assert_eq!(parse_callback(&data), Some(ControlAction::Stop { job_id: id }));
    }

    #[test]
    fn dismiss_callback_parses() {
        assert_eq!(
            parse_callback(&build_dismiss_callback("tok/+en")),
            Some(ControlAction::Dismiss {
                token: "tok/+en".into()
            })
        );
    }

    #[test]
    fn payloads_fit_telegram_limit() {
        let token = "A".repeat(20);
        assert!(build_select_callback(MediaFormat::Audio, &token).len() <= 64);
        let id = JobId::from_raw(format!("{}_{}", i64::MIN, u128::from(u64::MAX)));
        assert!(build_stop_callback(&id).len() <= 64);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(parse_callback("fmt:mkv:abc"), None);
        assert_eq!(parse_callback("fmt:mp4:"), None);
        assert_eq!(parse_callback("stop:"), None);
        assert_eq!(parse_callback("cancel:"), None);
        assert_eq!(parse_callback("something"), None);
    }
}
