//! On-disk schemas of the pins file.

use serde::{Deserialize, Serialize};

use crate::identity::ReferenceKind;

/// Current schema: a flat pin list keyed by identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinsFileV2 {
    pub version: u32,

    #[serde(
        default,
        rename = "originHash",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_hash: Option<String>,

    #[serde(default)]
    pub pins: Vec<PinEntryV2>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinEntryV2 {
    pub identity: String,
    pub kind: ReferenceKind,
    pub location: String,
    pub state: PinStateEntry,
}

/// Legacy schema: pins nested under `object`, identity derived from the
/// repository URL.
#[derive(Debug, Clone, Deserialize)]
pub struct PinsFileV1 {
    #[allow(dead_code)]
    pub version: u32,
    pub object: PinsObjectV1,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinsObjectV1 {
    #[serde(default)]
    pub pins: Vec<PinEntryV1>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinEntryV1 {
    pub package: String,
    #[serde(rename = "repositoryURL")]
    pub repository_url: String,
    pub state: PinStateEntry,
}

/// The state object shared by both schemas. At least one of the fields is
/// present; `revision` whenever the pin came from a source-control origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinStateEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}
