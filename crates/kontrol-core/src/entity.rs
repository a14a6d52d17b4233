//! Model entities: racks, modules, pages, parameters
//!
//! A rack is a networked peer addressed by host:port. It owns modules;
//! each module owns parameters, presentation pages, and a MIDI-CC to
//! parameter mapping. Entities carry identity and current values only;
//! all mutation goes through the [`crate::KontrolModel`] facade.

use std::collections::BTreeMap;

use crate::{EntityId, KontrolError, KontrolResult, ParamValue};

/// A networked peer hosting modules.
#[derive(Clone, Debug)]
pub struct Rack {
    id: EntityId,
    host: String,
    port: u16,
    modules: BTreeMap<EntityId, Module>,
    resources: BTreeMap<String, Vec<String>>,
}

impl Rack {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Rack {
            id: EntityId::for_rack(&host, port),
            host,
            port,
            modules: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn module(&self, id: &EntityId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Resource names grouped by resource type.
    pub fn resources(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.resources.iter().map(|(t, r)| (t.as_str(), r.as_slice()))
    }

    pub(crate) fn module_mut(&mut self, id: &EntityId) -> KontrolResult<&mut Module> {
        self.modules
            .get_mut(id)
            .ok_or_else(|| KontrolError::ModuleNotFound(id.clone()))
    }

    pub(crate) fn insert_module(&mut self, module: Module) -> &Module {
        let id = module.id.clone();
        self.modules.insert(id.clone(), module);
        &self.modules[&id]
    }

    pub(crate) fn add_resource(&mut self, res_type: &str, name: &str) {
        let names = self.resources.entry(res_type.to_string()).or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
}

/// A functional unit within a rack.
#[derive(Clone, Debug)]
pub struct Module {
    id: EntityId,
    display_name: String,
    module_type: String,
    params: BTreeMap<EntityId, Parameter>,
    pages: Vec<Page>,
    midi_mapping: BTreeMap<u32, Vec<EntityId>>,
}

impl Module {
    pub fn new(
        id: EntityId,
        display_name: impl Into<String>,
        module_type: impl Into<String>,
    ) -> Self {
        Module {
            id,
            display_name: display_name.into(),
            module_type: module_type.into(),
            params: BTreeMap::new(),
            pages: Vec::new(),
            midi_mapping: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn module_type(&self) -> &str {
        &self.module_type
    }

    pub fn param(&self, id: &EntityId) -> Option<&Parameter> {
        self.params.get(id)
    }

    pub fn params(&self) -> impl Iterator<Item = &Parameter> {
        self.params.values()
    }

    /// Pages in creation order.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: &EntityId) -> Option<&Page> {
        self.pages.iter().find(|p| &p.id == id)
    }

    /// Controller-number to parameter-id mapping.
    pub fn midi_mapping(&self) -> impl Iterator<Item = (u32, &[EntityId])> {
        self.midi_mapping.iter().map(|(cc, ids)| (*cc, ids.as_slice()))
    }

    pub(crate) fn param_mut(&mut self, id: &EntityId) -> KontrolResult<&mut Parameter> {
        self.params
            .get_mut(id)
            .ok_or_else(|| KontrolError::ParamNotFound(id.clone()))
    }

    pub(crate) fn insert_param(&mut self, param: Parameter) -> &Parameter {
        let id = param.id.clone();
        self.params.insert(id.clone(), param);
        &self.params[&id]
    }

    /// Inserts a page, replacing any existing page with the same id in place.
    pub(crate) fn insert_page(&mut self, page: Page) -> &Page {
        match self.pages.iter().position(|p| p.id == page.id) {
            Some(pos) => {
                self.pages[pos] = page;
                &self.pages[pos]
            }
            None => {
                self.pages.push(page);
                self.pages.last().unwrap()
            }
        }
    }

    pub(crate) fn assign_midi_cc(&mut self, cc: u32, param_id: &EntityId) {
        let ids = self.midi_mapping.entry(cc).or_default();
        if !ids.contains(param_id) {
            ids.push(param_id.clone());
        }
    }

    pub(crate) fn unassign_midi_cc(&mut self, cc: u32, param_id: &EntityId) {
        if let Some(ids) = self.midi_mapping.get_mut(&cc) {
            ids.retain(|id| id != param_id);
            if ids.is_empty() {
                self.midi_mapping.remove(&cc);
            }
        }
    }
}

/// A named, ordered grouping of parameters for presentation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    id: EntityId,
    display_name: String,
    param_ids: Vec<EntityId>,
}

impl Page {
    pub fn new(id: EntityId, display_name: impl Into<String>, param_ids: Vec<EntityId>) -> Self {
        Page {
            id,
            display_name: display_name.into(),
            param_ids,
        }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn param_ids(&self) -> &[EntityId] {
        &self.param_ids
    }
}

/// A named, typed, mutable value exposed for control.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    id: EntityId,
    param_type: String,
    create_args: Vec<ParamValue>,
    current: ParamValue,
}

impl Parameter {
    /// Builds a parameter from its creation argument list.
    ///
    /// By convention `args[0]` is the type string and `args[1]` the
    /// parameter id; the remaining arguments are type-specific. The
    /// last float creation argument, if any, seeds the current value.
    pub fn from_args(args: Vec<ParamValue>) -> KontrolResult<Self> {
        let param_type = args
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| KontrolError::InvalidWireFormat(
                "parameter creation args missing type string".to_string(),
            ))?
            .to_string();
        let id = args
            .get(1)
            .and_then(|v| v.as_str())
            .ok_or_else(|| KontrolError::InvalidWireFormat(
                "parameter creation args missing id string".to_string(),
            ))?;

        let current = args
            .iter()
            .rev()
            .find_map(|v| v.as_float())
            .map(ParamValue::Float)
            .unwrap_or_default();

        Ok(Parameter {
            id: EntityId::new(id),
            param_type,
            create_args: args,
            current,
        })
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn param_type(&self) -> &str {
        &self.param_type
    }

    /// The full creation argument list, as sent on the wire.
    pub fn create_args(&self) -> &[ParamValue] {
        &self.create_args
    }

    pub fn current(&self) -> &ParamValue {
        &self.current
    }

    pub(crate) fn set_current(&mut self, value: ParamValue) {
        self.current = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_param(id: &str, min: f32, max: f32, default: f32) -> Parameter {
        Parameter::from_args(vec![
            ParamValue::from("float"),
            ParamValue::from(id),
            ParamValue::from(id),
            ParamValue::Float(min),
            ParamValue::Float(max),
            ParamValue::Float(default),
        ])
        .unwrap()
    }

    #[test]
    fn test_param_from_args() {
        let p = float_param("cutoff", 0.0, 1.0, 0.5);
        assert_eq!(p.id().as_str(), "cutoff");
        assert_eq!(p.param_type(), "float");
        assert_eq!(p.current(), &ParamValue::Float(0.5));
        assert_eq!(p.create_args().len(), 6);
    }

    #[test]
    fn test_param_from_args_rejects_missing_id() {
        let err = Parameter::from_args(vec![ParamValue::from("float")]);
        assert!(err.is_err());
        let err = Parameter::from_args(vec![
            ParamValue::from("float"),
            ParamValue::Float(1.0),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_string_param_defaults_to_zero() {
        let p = Parameter::from_args(vec![
            ParamValue::from("string"),
            ParamValue::from("preset"),
        ])
        .unwrap();
        assert_eq!(p.current(), &ParamValue::Float(0.0));
    }

    #[test]
    fn test_module_midi_mapping() {
        let mut m = Module::new(EntityId::new("m1"), "Filter", "flt");
        let cutoff = EntityId::new("cutoff");
        let res = EntityId::new("res");

        m.assign_midi_cc(74, &cutoff);
        m.assign_midi_cc(74, &cutoff); // duplicate is a no-op
        m.assign_midi_cc(74, &res);
        assert_eq!(m.midi_mapping().count(), 1);
        assert_eq!(m.midi_mapping().next().unwrap().1.len(), 2);

        m.unassign_midi_cc(74, &cutoff);
        m.unassign_midi_cc(74, &res);
        assert_eq!(m.midi_mapping().count(), 0);
    }

    #[test]
    fn test_page_replaced_in_place() {
        let mut m = Module::new(EntityId::new("m1"), "Filter", "flt");
        m.insert_page(Page::new(EntityId::new("pg1"), "Main", vec![]));
        m.insert_page(Page::new(EntityId::new("pg2"), "Extra", vec![]));
        m.insert_page(Page::new(
            EntityId::new("pg1"),
            "Main v2",
            vec![EntityId::new("cutoff")],
        ));

        assert_eq!(m.pages().len(), 2);
        assert_eq!(m.pages()[0].display_name(), "Main v2");
        assert_eq!(m.pages()[1].id().as_str(), "pg2");
    }
}
