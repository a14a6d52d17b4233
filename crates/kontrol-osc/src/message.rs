//! Protocol messages
//!
//! One enum variant per protocol address. `decode` returns `Ok(None)`
//! for an unknown address so newer peers never crash an older receiver;
//! malformed arguments for a known address fail the whole datagram.

use kontrol_core::{EntityId, KontrolError, KontrolResult, ParamValue};

use crate::{encode_bundle, decode_packet, OscArg};

pub const ADDR_PING: &str = "/Kontrol/ping";
pub const ADDR_RACK: &str = "/Kontrol/rack";
pub const ADDR_MODULE: &str = "/Kontrol/module";
pub const ADDR_PAGE: &str = "/Kontrol/page";
pub const ADDR_PARAM: &str = "/Kontrol/param";
pub const ADDR_CHANGED: &str = "/Kontrol/changed";
pub const ADDR_RESOURCE: &str = "/Kontrol/resource";
pub const ADDR_DELETE_RACK: &str = "/Kontrol/deleteRack";
pub const ADDR_ASSIGN_MIDI_CC: &str = "/Kontrol/assignMidiCC";
pub const ADDR_UNASSIGN_MIDI_CC: &str = "/Kontrol/unassignMidiCC";
pub const ADDR_UPDATE_PRESET: &str = "/Kontrol/updatePreset";
pub const ADDR_APPLY_PRESET: &str = "/Kontrol/applyPreset";
pub const ADDR_SAVE_SETTINGS: &str = "/Kontrol/saveSettings";
pub const ADDR_LOAD_MODULE: &str = "/Kontrol/loadModule";

/// A single protocol message, the payload of one datagram.
#[derive(Clone, Debug, PartialEq)]
pub enum KontrolMessage {
    Ping {
        port: u16,
        keep_alive: u32,
    },
    Rack {
        rack_id: EntityId,
        host: String,
        port: u16,
    },
    Module {
        rack_id: EntityId,
        module_id: EntityId,
        display_name: String,
        module_type: String,
    },
    Page {
        rack_id: EntityId,
        module_id: EntityId,
        page_id: EntityId,
        display_name: String,
        param_ids: Vec<EntityId>,
    },
    Param {
        rack_id: EntityId,
        module_id: EntityId,
        args: Vec<ParamValue>,
    },
    Changed {
        rack_id: EntityId,
        module_id: EntityId,
        param_id: EntityId,
        value: ParamValue,
    },
    Resource {
        rack_id: EntityId,
        res_type: String,
        name: String,
    },
    DeleteRack {
        rack_id: EntityId,
    },
    AssignMidiCc {
        rack_id: EntityId,
        module_id: EntityId,
        param_id: EntityId,
        cc: u32,
    },
    UnassignMidiCc {
        rack_id: EntityId,
        module_id: EntityId,
        param_id: EntityId,
        cc: u32,
    },
    UpdatePreset {
        rack_id: EntityId,
        preset: String,
    },
    ApplyPreset {
        rack_id: EntityId,
        preset: String,
    },
    SaveSettings {
        rack_id: EntityId,
    },
    LoadModule {
        rack_id: EntityId,
        module_id: EntityId,
        module_type: String,
    },
}

impl KontrolMessage {
    pub fn address(&self) -> &'static str {
        match self {
            KontrolMessage::Ping { .. } => ADDR_PING,
            KontrolMessage::Rack { .. } => ADDR_RACK,
            KontrolMessage::Module { .. } => ADDR_MODULE,
            KontrolMessage::Page { .. } => ADDR_PAGE,
            KontrolMessage::Param { .. } => ADDR_PARAM,
            KontrolMessage::Changed { .. } => ADDR_CHANGED,
            KontrolMessage::Resource { .. } => ADDR_RESOURCE,
            KontrolMessage::DeleteRack { .. } => ADDR_DELETE_RACK,
            KontrolMessage::AssignMidiCc { .. } => ADDR_ASSIGN_MIDI_CC,
            KontrolMessage::UnassignMidiCc { .. } => ADDR_UNASSIGN_MIDI_CC,
            KontrolMessage::UpdatePreset { .. } => ADDR_UPDATE_PRESET,
            KontrolMessage::ApplyPreset { .. } => ADDR_APPLY_PRESET,
            KontrolMessage::SaveSettings { .. } => ADDR_SAVE_SETTINGS,
            KontrolMessage::LoadModule { .. } => ADDR_LOAD_MODULE,
        }
    }

    /// Encodes the message as a single-element bundle.
    pub fn encode(&self) -> Vec<u8> {
        let args = self.args();
        encode_bundle(self.address(), &args)
    }

    fn args(&self) -> Vec<OscArg> {
        match self {
            KontrolMessage::Ping { port, keep_alive } => {
                vec![OscArg::Int(*port as i32), OscArg::Int(*keep_alive as i32)]
            }
            KontrolMessage::Rack { rack_id, host, port } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(host.as_str()),
                OscArg::Int(*port as i32),
            ],
            KontrolMessage::Module {
                rack_id,
                module_id,
                display_name,
                module_type,
            } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(module_id.as_str()),
                OscArg::from(display_name.as_str()),
                OscArg::from(module_type.as_str()),
            ],
            KontrolMessage::Page {
                rack_id,
                module_id,
                page_id,
                display_name,
                param_ids,
            } => {
                let mut args = vec![
                    OscArg::from(rack_id.as_str()),
                    OscArg::from(module_id.as_str()),
                    OscArg::from(page_id.as_str()),
                    OscArg::from(display_name.as_str()),
                ];
                args.extend(param_ids.iter().map(|id| OscArg::from(id.as_str())));
                args
            }
            KontrolMessage::Param {
                rack_id,
                module_id,
                args,
            } => {
                let mut out = vec![
                    OscArg::from(rack_id.as_str()),
                    OscArg::from(module_id.as_str()),
                ];
                out.extend(args.iter().map(OscArg::from));
                out
            }
            KontrolMessage::Changed {
                rack_id,
                module_id,
                param_id,
                value,
            } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(module_id.as_str()),
                OscArg::from(param_id.as_str()),
                OscArg::from(value),
            ],
            KontrolMessage::Resource {
                rack_id,
                res_type,
                name,
            } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(res_type.as_str()),
                OscArg::from(name.as_str()),
            ],
            KontrolMessage::DeleteRack { rack_id } => vec![OscArg::from(rack_id.as_str())],
            KontrolMessage::AssignMidiCc {
                rack_id,
                module_id,
                param_id,
                cc,
            }
            | KontrolMessage::UnassignMidiCc {
                rack_id,
                module_id,
                param_id,
                cc,
            } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(module_id.as_str()),
                OscArg::from(param_id.as_str()),
                OscArg::Int(*cc as i32),
            ],
            KontrolMessage::UpdatePreset { rack_id, preset }
            | KontrolMessage::ApplyPreset { rack_id, preset } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(preset.as_str()),
            ],
            KontrolMessage::SaveSettings { rack_id } => vec![OscArg::from(rack_id.as_str())],
            KontrolMessage::LoadModule {
                rack_id,
                module_id,
                module_type,
            } => vec![
                OscArg::from(rack_id.as_str()),
                OscArg::from(module_id.as_str()),
                OscArg::from(module_type.as_str()),
            ],
        }
    }

    /// Decodes one datagram.
    ///
    /// `Ok(None)` means the address is unknown and the datagram should
    /// be ignored; `Err` means the datagram is malformed and must be
    /// discarded whole.
    pub fn decode(buf: &[u8]) -> KontrolResult<Option<KontrolMessage>> {
        let (address, args) = decode_packet(buf)?;
        let mut r = ArgReader::new(&address, args);

        let msg = match address.as_str() {
            ADDR_PING => KontrolMessage::Ping {
                port: r.port()?,
                keep_alive: r.unsigned()?,
            },
            ADDR_RACK => KontrolMessage::Rack {
                rack_id: r.entity_id()?,
                host: r.str()?,
                port: r.port()?,
            },
            ADDR_MODULE => KontrolMessage::Module {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                display_name: r.str()?,
                module_type: r.str()?,
            },
            ADDR_PAGE => KontrolMessage::Page {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                page_id: r.entity_id()?,
                display_name: r.str()?,
                param_ids: r.entity_ids()?,
            },
            ADDR_PARAM => KontrolMessage::Param {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                args: r.param_values()?,
            },
            ADDR_CHANGED => KontrolMessage::Changed {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                param_id: r.entity_id()?,
                value: r.param_value()?,
            },
            ADDR_RESOURCE => KontrolMessage::Resource {
                rack_id: r.entity_id()?,
                res_type: r.str()?,
                name: r.str()?,
            },
            ADDR_DELETE_RACK => KontrolMessage::DeleteRack {
                rack_id: r.entity_id()?,
            },
            ADDR_ASSIGN_MIDI_CC => KontrolMessage::AssignMidiCc {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                param_id: r.entity_id()?,
                cc: r.unsigned()?,
            },
            ADDR_UNASSIGN_MIDI_CC => KontrolMessage::UnassignMidiCc {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                param_id: r.entity_id()?,
                cc: r.unsigned()?,
            },
            ADDR_UPDATE_PRESET => KontrolMessage::UpdatePreset {
                rack_id: r.entity_id()?,
                preset: r.str()?,
            },
            ADDR_APPLY_PRESET => KontrolMessage::ApplyPreset {
                rack_id: r.entity_id()?,
                preset: r.str()?,
            },
            ADDR_SAVE_SETTINGS => KontrolMessage::SaveSettings {
                rack_id: r.entity_id()?,
            },
            ADDR_LOAD_MODULE => KontrolMessage::LoadModule {
                rack_id: r.entity_id()?,
                module_id: r.entity_id()?,
                module_type: r.str()?,
            },
            _ => return Ok(None),
        };

        r.finish()?;
        Ok(Some(msg))
    }
}

/// Pulls typed arguments off a decoded argument list in order.
struct ArgReader {
    address: String,
    args: std::vec::IntoIter<OscArg>,
    index: usize,
}

impl ArgReader {
    fn new(address: &str, args: Vec<OscArg>) -> Self {
        ArgReader {
            address: address.to_string(),
            args: args.into_iter(),
            index: 0,
        }
    }

    fn mismatch(&self, detail: impl Into<String>) -> KontrolError {
        KontrolError::ArgumentMismatch {
            address: self.address.clone(),
            detail: detail.into(),
        }
    }

    fn next(&mut self) -> KontrolResult<OscArg> {
        self.index += 1;
        self.args
            .next()
            .ok_or_else(|| self.mismatch(format!("missing argument {}", self.index)))
    }

    fn str(&mut self) -> KontrolResult<String> {
        let arg = self.next()?;
        arg.as_str()
            .map(str::to_string)
            .ok_or_else(|| self.mismatch(format!("argument {} is not a string", self.index)))
    }

    fn entity_id(&mut self) -> KontrolResult<EntityId> {
        Ok(EntityId::new(self.str()?))
    }

    fn entity_ids(&mut self) -> KontrolResult<Vec<EntityId>> {
        let mut ids = Vec::new();
        while self.args.len() > 0 {
            ids.push(self.entity_id()?);
        }
        Ok(ids)
    }

    fn int(&mut self) -> KontrolResult<i32> {
        let arg = self.next()?;
        arg.as_int()
            .ok_or_else(|| self.mismatch(format!("argument {} is not an int", self.index)))
    }

    fn unsigned(&mut self) -> KontrolResult<u32> {
        let v = self.int()?;
        u32::try_from(v).map_err(|_| self.mismatch(format!("argument {} is negative", self.index)))
    }

    fn port(&mut self) -> KontrolResult<u16> {
        let v = self.int()?;
        u16::try_from(v)
            .map_err(|_| self.mismatch(format!("argument {} is not a valid port", self.index)))
    }

    fn param_value(&mut self) -> KontrolResult<ParamValue> {
        let arg = self.next()?;
        arg.to_param_value()
            .ok_or_else(|| self.mismatch(format!("argument {} is not float or string", self.index)))
    }

    fn param_values(&mut self) -> KontrolResult<Vec<ParamValue>> {
        let mut values = Vec::new();
        while self.args.len() > 0 {
            values.push(self.param_value()?);
        }
        Ok(values)
    }

    fn finish(mut self) -> KontrolResult<()> {
        if self.args.next().is_some() {
            return Err(self.mismatch("trailing arguments"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: KontrolMessage) -> KontrolMessage {
        let buf = msg.encode();
        KontrolMessage::decode(&buf).unwrap().unwrap()
    }

    #[test]
    fn test_ping_roundtrip() {
        let msg = KontrolMessage::Ping {
            port: 9000,
            keep_alive: 5,
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_param_roundtrip_mixed_args() {
        let msg = KontrolMessage::Param {
            rack_id: EntityId::new("127.0.0.1:9000"),
            module_id: EntityId::new("m1"),
            args: vec![
                ParamValue::from("float"),
                ParamValue::from("cutoff"),
                ParamValue::from("Cutoff"),
                ParamValue::Float(0.0),
                ParamValue::Float(1.0),
                ParamValue::Float(0.5),
            ],
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_changed_float_bit_exact() {
        let value = f32::from_bits(0x3f80_0001);
        let msg = KontrolMessage::Changed {
            rack_id: EntityId::new("r"),
            module_id: EntityId::new("m"),
            param_id: EntityId::new("p"),
            value: ParamValue::Float(value),
        };
        let decoded = roundtrip(msg);
        let KontrolMessage::Changed { value: ParamValue::Float(v), .. } = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(v.to_bits(), value.to_bits());
    }

    #[test]
    fn test_changed_string_value() {
        let msg = KontrolMessage::Changed {
            rack_id: EntityId::new("r"),
            module_id: EntityId::new("m"),
            param_id: EntityId::new("p"),
            value: ParamValue::from("saw"),
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }

    #[test]
    fn test_page_variadic_param_ids() {
        let msg = KontrolMessage::Page {
            rack_id: EntityId::new("r"),
            module_id: EntityId::new("m"),
            page_id: EntityId::new("pg1"),
            display_name: "Main".to_string(),
            param_ids: vec![EntityId::new("cutoff"), EntityId::new("res")],
        };
        assert_eq!(roundtrip(msg.clone()), msg);

        let empty = KontrolMessage::Page {
            rack_id: EntityId::new("r"),
            module_id: EntityId::new("m"),
            page_id: EntityId::new("pg2"),
            display_name: "Empty".to_string(),
            param_ids: vec![],
        };
        assert_eq!(roundtrip(empty.clone()), empty);
    }

    #[test]
    fn test_unknown_address_ignored() {
        let buf = encode_bundle("/Kontrol/futureThing", &[OscArg::Int(1)]);
        assert!(KontrolMessage::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn test_known_address_bad_args_rejected() {
        // ping with a string where an int is required
        let buf = encode_bundle(ADDR_PING, &[OscArg::from("9000"), OscArg::Int(5)]);
        assert!(KontrolMessage::decode(&buf).is_err());

        // rack with too few arguments
        let buf = encode_bundle(ADDR_RACK, &[OscArg::from("r1")]);
        assert!(KontrolMessage::decode(&buf).is_err());

        // negative keep-alive
        let buf = encode_bundle(ADDR_PING, &[OscArg::Int(9000), OscArg::Int(-1)]);
        assert!(KontrolMessage::decode(&buf).is_err());

        // trailing junk on a fixed-arity message
        let buf = encode_bundle(
            ADDR_SAVE_SETTINGS,
            &[OscArg::from("r1"), OscArg::Int(1)],
        );
        assert!(KontrolMessage::decode(&buf).is_err());
    }

    #[test]
    fn test_assign_midi_cc_roundtrip() {
        let msg = KontrolMessage::AssignMidiCc {
            rack_id: EntityId::new("r"),
            module_id: EntityId::new("m"),
            param_id: EntityId::new("cutoff"),
            cc: 74,
        };
        assert_eq!(roundtrip(msg.clone()), msg);
    }
}
