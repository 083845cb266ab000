//! JSON wire format shared by both transports.
//!
//! Requests and responses use camelCase keys. Missing token counts default
//! to zero; a response carrying `error` is an error envelope regardless of
//! any other field.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnswerWireRequest<'a> {
    pub question: &'a str,
    pub company_name: &'a str,
    pub competitors: &'a [String],
    pub web_search_enabled: bool,
    pub max_tokens: u32,
    pub model: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireTokens {
    #[serde(default)]
    pub input: i64,
    #[serde(default)]
    pub output: i64,
    #[serde(default)]
    pub cached: i64,
    #[serde(default)]
    pub thinking: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AnswerWireResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub tokens_used: Option<WireTokens>,
    #[serde(default)]
    pub search_count: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DetectWireRequest<'a> {
    pub text: &'a str,
    pub company_name: &'a str,
    pub competitors: &'a [String],
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMention {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    #[serde(default)]
    pub context: Option<String>,
    pub position: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DetectWireResponse {
    #[serde(default)]
    pub mentions: Option<Vec<WireMention>>,
    #[serde(default)]
    pub tokens_used: Option<WireTokens>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
