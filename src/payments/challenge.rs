//! 3-D Secure challenge shapes and the phase DAG built on top of them.
//!
//! The gateway answers a `3ds_required` authorization with one of three
//! differently shaped payloads. They are parsed once, at the boundary, into
//! [`ChallengeState`]; everything downstream matches on the variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Challenge data that is currently outstanding for an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChallengeState {
    /// Basic 3DS: redirect the cardholder to the issuer's ACS.
    AcsRedirect {
        acs_url: String,
        pa_req: String,
        md: String,
    },
    /// Extended 3DS: a hidden fingerprinting iframe has to load first.
    ExtendedIframe {
        iframe_url: String,
        #[serde(default)]
        iframe_params: Map<String, JsonValue>,
    },
    /// 3DS2 challenge, usually reached after fingerprinting.
    #[serde(rename = "threeds2_challenge")]
    ThreeDs2Challenge {
        acs_url: String,
        creq: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_data: Option<String>,
    },
}

/// Which challenge phases have already been satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeProgress {
    pub fingerprint_complete: bool,
    pub challenge_handled: bool,
}

/// The phase an invoice is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePhase {
    /// The fingerprinting iframe has not reported completion.
    FingerprintPending,
    /// Fingerprinting finished; the gateway has not yet asked for a challenge.
    AwaitingChallenge,
    /// The cardholder still has to complete an ACS or 3DS2 challenge.
    ChallengePending,
    /// Every client-side phase is done; only the gateway verdict is missing.
    AwaitingVerdict,
}

impl ChallengePhase {
    /// True when the client has to do something (load an iframe, follow a redirect).
    pub fn requires_client_action(&self) -> bool {
        matches!(
            self,
            ChallengePhase::FingerprintPending | ChallengePhase::ChallengePending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePhase::FingerprintPending => "fingerprint_pending",
            ChallengePhase::AwaitingChallenge => "awaiting_challenge",
            ChallengePhase::ChallengePending => "challenge_pending",
            ChallengePhase::AwaitingVerdict => "awaiting_verdict",
        }
    }
}

impl ChallengeState {
    pub fn kind(&self) -> &'static str {
        match self {
            ChallengeState::AcsRedirect { .. } => "acs_redirect",
            ChallengeState::ExtendedIframe { .. } => "extended_iframe",
            ChallengeState::ThreeDs2Challenge { .. } => "threeds2_challenge",
        }
    }

    /// Phase still outstanding given what has already been satisfied.
    ///
    /// Basic ACS redirects have no fingerprinting phase. A 3DS2 challenge is
    /// only ever presented once fingerprinting is over, so its presence alone
    /// means that phase is behind us even if no notify call arrived.
    pub fn outstanding_phase(&self, progress: ChallengeProgress) -> ChallengePhase {
        match self {
            ChallengeState::AcsRedirect { .. } | ChallengeState::ThreeDs2Challenge { .. } => {
                if progress.challenge_handled {
                    ChallengePhase::AwaitingVerdict
                } else {
                    ChallengePhase::ChallengePending
                }
            }
            ChallengeState::ExtendedIframe { .. } => {
                if !progress.fingerprint_complete {
                    ChallengePhase::FingerprintPending
                } else if progress.challenge_handled {
                    ChallengePhase::AwaitingVerdict
                } else {
                    ChallengePhase::AwaitingChallenge
                }
            }
        }
    }

    /// Multi-phase shapes tell the client which phase it is in.
    pub fn reports_phase(&self) -> bool {
        !matches!(self, ChallengeState::AcsRedirect { .. })
    }

    /// True for shapes the cardholder must complete through an ACS.
    pub fn presents_challenge(&self) -> bool {
        matches!(
            self,
            ChallengeState::AcsRedirect { .. } | ChallengeState::ThreeDs2Challenge { .. }
        )
    }

    /// Whether replacing `previous` with this state opens a new challenge, so
    /// an earlier challenge return no longer counts.
    pub fn resets_challenge(&self, previous: Option<&ChallengeState>) -> bool {
        self.presents_challenge() && previous != Some(self)
    }

    /// True when moving to this state implies fingerprinting has finished.
    pub fn implies_fingerprint_complete(&self) -> bool {
        matches!(self, ChallengeState::ThreeDs2Challenge { .. })
    }

    /// Fields handed to the client so it can render the redirect or iframe.
    pub fn client_fields(&self) -> Map<String, JsonValue> {
        let mut fields = Map::new();
        match self {
            ChallengeState::AcsRedirect { acs_url, pa_req, md } => {
                fields.insert("acs_url".to_string(), JsonValue::from(acs_url.as_str()));
                fields.insert("pa_req".to_string(), JsonValue::from(pa_req.as_str()));
                fields.insert("md".to_string(), JsonValue::from(md.as_str()));
            }
            ChallengeState::ExtendedIframe {
                iframe_url,
                iframe_params,
            } => {
                fields.insert(
                    "iframe_url".to_string(),
                    JsonValue::from(iframe_url.as_str()),
                );
                fields.insert(
                    "iframe_params".to_string(),
                    JsonValue::Object(iframe_params.clone()),
                );
            }
            ChallengeState::ThreeDs2Challenge {
                acs_url,
                creq,
                session_data,
            } => {
                fields.insert("acs_url".to_string(), JsonValue::from(acs_url.as_str()));
                fields.insert("creq".to_string(), JsonValue::from(creq.as_str()));
                if let Some(data) = session_data {
                    fields.insert("session_data".to_string(), JsonValue::from(data.as_str()));
                }
            }
        }
        fields
    }

    /// Parse whichever challenge shape the gateway returned.
    ///
    /// Looks inside `three_ds` first and falls back to the top level of the
    /// body. The nested 3DS2 structure wins over the flat shapes because the
    /// gateway keeps stale fingerprinting fields next to it.
    pub fn from_gateway(body: &JsonValue) -> Option<ChallengeState> {
        let scope = body
            .get("three_ds")
            .or_else(|| body.get("threeDS"))
            .filter(|v| v.is_object())
            .unwrap_or(body);

        if let Some(nested) = first_object(scope, &["threeds2", "three_ds2", "threeDS2"]) {
            let acs_url = first_str(nested, &["acs_url", "acsURL", "acsUrl"]);
            let creq = first_str(nested, &["creq", "cReq"]);
            if let (Some(acs_url), Some(creq)) = (acs_url, creq) {
                return Some(ChallengeState::ThreeDs2Challenge {
                    acs_url,
                    creq,
                    session_data: first_str(
                        nested,
                        &["session_data", "threeDSSessionData", "three_ds_session_data"],
                    ),
                });
            }
        }

        if let Some(iframe_url) = first_str(scope, &["iframe_url", "iframeUrl", "method_url"]) {
            let iframe_params = first_object(scope, &["iframe_params", "iframeParams", "method_data"])
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            return Some(ChallengeState::ExtendedIframe {
                iframe_url,
                iframe_params,
            });
        }

        let acs_url = first_str(scope, &["acs_url", "acsUrl", "ACSUrl"]);
        let pa_req = first_str(scope, &["pa_req", "paReq", "PaReq"]);
        let md = first_str(scope, &["md", "MD"]);
        match (acs_url, pa_req, md) {
            (Some(acs_url), Some(pa_req), Some(md)) => {
                Some(ChallengeState::AcsRedirect { acs_url, pa_req, md })
            }
            _ => None,
        }
    }
}

fn first_str(value: &JsonValue, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .filter_map(|v| v.as_str())
        .find(|s| !s.trim().is_empty())
        .map(|s| s.to_string())
}

fn first_object<'a>(value: &'a JsonValue, keys: &[&str]) -> Option<&'a JsonValue> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| v.is_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_basic_acs_redirect() {
        let body = json!({
            "status": "3ds_required",
            "three_ds": {"acs_url": "https://acs.example/auth", "pa_req": "eJzN", "md": "md-1"}
        });
        let state = ChallengeState::from_gateway(&body).expect("shape should parse");
        assert_eq!(state.kind(), "acs_redirect");
        let fields = state.client_fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["md"], "md-1");
    }

    #[test]
    fn nested_threeds2_takes_precedence() {
        let body = json!({
            "iframe_url": "https://gw.example/fp",
            "threeds2": {"acsURL": "https://acs.example/v2", "creq": "abc"}
        });
        let state = ChallengeState::from_gateway(&body).expect("shape should parse");
        assert!(matches!(state, ChallengeState::ThreeDs2Challenge { .. }));
        assert!(state.implies_fingerprint_complete());
    }

    #[test]
    fn incomplete_shapes_are_rejected() {
        assert!(ChallengeState::from_gateway(&json!({"acs_url": "x", "md": "y"})).is_none());
        assert!(ChallengeState::from_gateway(&json!({"three_ds": {}})).is_none());
    }

    #[test]
    fn extended_iframe_walks_its_phases() {
        let state = ChallengeState::ExtendedIframe {
            iframe_url: "https://gw.example/fp".to_string(),
            iframe_params: Map::new(),
        };
        let mut progress = ChallengeProgress::default();
        assert_eq!(
            state.outstanding_phase(progress),
            ChallengePhase::FingerprintPending
        );
        progress.fingerprint_complete = true;
        assert_eq!(
            state.outstanding_phase(progress),
            ChallengePhase::AwaitingChallenge
        );
        progress.challenge_handled = true;
        assert_eq!(
            state.outstanding_phase(progress),
            ChallengePhase::AwaitingVerdict
        );
    }

    #[test]
    fn acs_redirect_skips_fingerprinting() {
        let state = ChallengeState::AcsRedirect {
            acs_url: "https://acs.example".to_string(),
            pa_req: "p".to_string(),
            md: "m".to_string(),
        };
        let phase = state.outstanding_phase(ChallengeProgress::default());
        assert_eq!(phase, ChallengePhase::ChallengePending);
        assert!(phase.requires_client_action());
    }

    #[test]
    fn only_a_new_challenge_resets_the_handled_flag() {
        let iframe = ChallengeState::ExtendedIframe {
            iframe_url: "https://gw.example/fp".to_string(),
            iframe_params: Map::new(),
        };
        let creq = ChallengeState::ThreeDs2Challenge {
            acs_url: "https://acs.example".to_string(),
            creq: "c".to_string(),
            session_data: None,
        };
        assert!(creq.resets_challenge(Some(&iframe)));
        assert!(creq.resets_challenge(None));
        assert!(!creq.resets_challenge(Some(&creq.clone())));
        assert!(!iframe.resets_challenge(Some(&creq)));
    }

    #[test]
    fn serialized_form_is_tagged() {
        let state = ChallengeState::ThreeDs2Challenge {
            acs_url: "https://acs.example".to_string(),
            creq: "c".to_string(),
            session_data: None,
        };
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["kind"], "threeds2_challenge");
        let back: ChallengeState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
