//! MIME-type configuration.
//!
//! A codec is opened on a semicolon-separated MIME type such as
//!
//! ```text
//! application/x-automotive-bus; interface=stream; type=pdu; schema=fbs;
//! ecu_id=1; vcn=2; model=flexray
//! ```
//!
//! The recognised keys assemble the node identity, select the bus model
//! and set its initial conditions. Keys may also be adjusted after open
//! through the codec's `config` call.

use thiserror::Error;
use tracing::debug;
use vfray::prelude::*;

/// Media type every vfray codec is opened on.
pub const MEDIA_TYPE: &str = "application/x-automotive-bus";

/// MIME-type parse/validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MimeError {
    /// Leading media type is not `application/x-automotive-bus`.
    #[error("unsupported media type: {0}")]
    MediaType(String),

    /// A mandatory key is missing.
    #[error("missing key: {0}")]
    MissingKey(&'static str),

    /// A key carries a value this codec does not support.
    #[error("unsupported value for {key}: {value}")]
    Unsupported {
        /// Key name.
        key: &'static str,
        /// Offending value.
        value: String,
    },

    /// A key value failed to parse.
    #[error("invalid value for {key}: {value}")]
    Invalid {
        /// Key name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Parsed MIME-type configuration of one codec instance.
#[derive(Debug, Clone, Default)]
pub struct MimeConfig {
    /// Codec interface; only `stream` is supported.
    pub interface: String,
    /// Message type; only `pdu` is supported.
    pub codec_type: String,
    /// Wire schema; only `fbs` is supported.
    pub schema: String,
    /// Selected bus model; only `flexray` is supported.
    pub model: String,
    /// Bus-model operation mode; `pop` selects the PoP dispatcher.
    pub mode: Option<String>,
    /// Optional human-readable node name.
    pub name: Option<String>,

    /// ECU identifier of this node.
    pub ecu_id: u8,
    /// Communication-controller identifier of this node.
    pub cc_id: u8,
    /// Software-component identifier of this node.
    pub swc_id: u8,

    /// Count of virtual cold-start nodes this node announces.
    pub vcn_count: u8,
    /// Initial POC state for channel A.
    pub poc_state_cha: Option<PocState>,
    /// Initial POC state for channel B.
    pub poc_state_chb: Option<PocState>,
    /// Initial power state (`pwr=on|off`, default on).
    pub power_on: bool,
}

impl MimeConfig {
    /// Parse a MIME type string.
    pub fn parse(mime_type: &str) -> Result<Self, MimeError> {
        let mut segments = mime_type.split(';').map(str::trim);
        let media_type = segments.next().unwrap_or_default();
        if media_type != MEDIA_TYPE {
            return Err(MimeError::MediaType(media_type.to_string()));
        }

        let mut config = Self {
            power_on: true,
            ..Default::default()
        };
        for segment in segments {
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            config.set(name.trim(), value.trim())?;
        }

        if config.interface != "stream" {
            return Err(unsupported("interface", &config.interface));
        }
        if config.codec_type != "pdu" {
            return Err(unsupported("type", &config.codec_type));
        }
        if config.schema != "fbs" {
            return Err(unsupported("schema", &config.schema));
        }
        if config.model.is_empty() {
            return Err(MimeError::MissingKey("model"));
        }
        if config.model != "flexray" {
            return Err(unsupported("model", &config.model));
        }
        Ok(config)
    }

    /// Apply one `name=value` configuration item (MIME segment or a
    /// post-open `config` call). Unknown keys are ignored.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), MimeError> {
        match name {
            "interface" => self.interface = value.to_string(),
            "type" => self.codec_type = value.to_string(),
            "schema" => self.schema = value.to_string(),
            "model" => self.model = value.to_string(),
            "mode" => self.mode = Some(value.to_string()),
            "name" => self.name = Some(value.to_string()),
            "ecu_id" => self.ecu_id = parse_u8("ecu_id", value)?,
            "cc_id" => self.cc_id = parse_u8("cc_id", value)?,
            "swc_id" => self.swc_id = parse_u8("swc_id", value)?,
            "vcn" => self.vcn_count = parse_u8("vcn", value)?,
            "poca" => {
                self.poc_state_cha = Some(parse_poc_state("poca", value)?);
            }
            "pocb" => {
                self.poc_state_chb = Some(parse_poc_state("pocb", value)?);
            }
            "pwr" => match value {
                "on" => self.power_on = true,
                "off" => self.power_on = false,
                _ => return Err(unsupported("pwr", value)),
            },
            _ => {
                debug!(key = name, value, "ignoring unknown MIME key");
            }
        }
        Ok(())
    }

    /// This node's packed identity.
    #[inline]
    pub fn node_ident(&self) -> NodeId {
        NodeId::new(self.ecu_id, self.cc_id, self.swc_id)
    }

    /// True when the PoP dispatcher is selected.
    #[inline]
    pub fn is_pop(&self) -> bool {
        self.mode.as_deref() == Some("pop")
    }

    /// The virtual cold-start nodes this instance announces.
    ///
    /// Identities are cluster-global (drawn from a reserved ECU id
    /// range), so several announcing nodes agree on the same VCN set.
    pub fn vcn_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.vcn_count.min(MAX_VCN as u8)).map(|i| NodeId::new(0xf8 + i, 0, 0))
    }
}

fn unsupported(key: &'static str, value: &str) -> MimeError {
    MimeError::Unsupported {
        key,
        value: value.to_string(),
    }
}

fn parse_u8(key: &'static str, value: &str) -> Result<u8, MimeError> {
    value.parse().map_err(|_| MimeError::Invalid {
        key,
        value: value.to_string(),
    })
}

fn parse_poc_state(key: &'static str, value: &str) -> Result<PocState, MimeError> {
    let raw = parse_u8(key, value)?;
    PocState::from_u8(raw).ok_or_else(|| MimeError::Invalid {
        key,
        value: value.to_string(),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────
