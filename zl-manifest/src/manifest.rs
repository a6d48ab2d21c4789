use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::module::{Module, ModuleId};
use crate::topo::{is_topologically_sorted, topological_sort};

/// On-the-wire representation; field names and field order are fixed by the manifest JSON format,
/// and `modules`'s iteration order is preserved end to end by `IndexMap`'s serde impl.
#[derive(Serialize, Deserialize)]
struct ManifestDto {
    modules: IndexMap<ModuleId, Module>,
    #[serde(rename = "mainModuleId")]
    main_module_id: ModuleId,
    #[serde(rename = "mainFunction", default)]
    main_function: Option<String>,
    #[serde(default)]
    signatures: IndexMap<String, String>,
}

/// Immutable, topologically-sorted description of a deployable application's module graph.
///
/// Constructed only through [`Manifest::create`] or [`Manifest::parse`], both of which enforce
/// M1-M3; there is no way to obtain a `Manifest` whose `modules` iterate out of dependency order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    modules: IndexMap<ModuleId, Module>,
    main_module_id: ModuleId,
    main_function: Option<String>,
    signatures: IndexMap<String, String>,
}

impl Manifest {
    /// Builds a Manifest from a possibly-unsorted mapping, running a stable topological sort
    /// (ties broken by `modules`' own iteration order) and validating M1-M3.
    pub fn create(
        modules: impl IntoIterator<Item = (ModuleId, Module)>,
        main_module_id: Option<ModuleId>,
        main_function: Option<String>,
        signatures: IndexMap<String, String>,
    ) -> Result<Manifest, Error> {
        let input: IndexMap<ModuleId, Module> = modules.into_iter().collect();
        let ids: Vec<ModuleId> = input.keys().cloned().collect();
        let sorted_ids = topological_sort(&ids, |id| {
            input
                .get(id)
                .map(|m| m.depends_on_ids.as_slice())
                .unwrap_or(&[])
        })?;

        let mut sorted = IndexMap::with_capacity(input.len());
        for id in sorted_ids {
            let module = input
                .get(&id)
                .cloned()
                .expect("topological_sort only returns known ids");
            sorted.insert(id, module);
        }

        Self::from_sorted(sorted, main_module_id, main_function, signatures)
    }

    /// Parses manifest JSON. The `modules` object MUST already be in topological order;
    /// unlike [`Manifest::create`], parsing never reorders -- it only validates, so that a
    /// corrupted or hand-edited manifest fails loudly instead of silently being resorted.
    pub fn parse(json: &str) -> Result<Manifest, Error> {
        let dto: ManifestDto = serde_json::from_str(json)
            .map_err(|e| Error::MalformedManifest(format!("invalid JSON: {e}")))?;

        let ids: Vec<ModuleId> = dto.modules.keys().cloned().collect();
        if !is_topologically_sorted(&ids, |id| {
            dto.modules
                .get(id)
                .map(|m| m.depends_on_ids.as_slice())
                .unwrap_or(&[])
        }) {
            return Err(Error::MalformedManifest(
                "modules are not in topological order".to_string(),
            ));
        }
        // is_topologically_sorted only returns true when every referenced dependency id also
        // appears earlier in `ids`, which already rules out missing ids and cycles (M1, M3); the
        // explicit membership re-check below exists purely to produce a clearer error message.
        for id in &ids {
            for dep in &dto.modules[id].depends_on_ids {
                if !dto.modules.contains_key(dep) {
                    return Err(Error::MalformedManifest(format!(
                        "module {id} depends on unknown module {dep}"
                    )));
                }
            }
        }

        Self::from_sorted(
            dto.modules,
            Some(dto.main_module_id),
            dto.main_function,
            dto.signatures,
        )
    }

    /// Serializes to the canonical manifest JSON layout, preserving `modules`' topological order.
    pub fn to_json(&self) -> Result<String, Error> {
        let dto = ManifestDto {
            modules: self.modules.clone(),
            main_module_id: self.main_module_id.clone(),
            main_function: self.main_function.clone(),
            signatures: self.signatures.clone(),
        };
        serde_json::to_string_pretty(&dto)
            .map_err(|e| Error::MalformedManifest(format!("failed to serialize: {e}")))
    }

    fn from_sorted(
        modules: IndexMap<ModuleId, Module>,
        main_module_id: Option<ModuleId>,
        main_function: Option<String>,
        signatures: IndexMap<String, String>,
    ) -> Result<Manifest, Error> {
        let main_module_id =
            match main_module_id {
                Some(id) => id,
                None => modules.keys().last().cloned().ok_or_else(|| {
                    Error::MalformedManifest("manifest has no modules".to_string())
                })?,
            };
        if !modules.contains_key(&main_module_id) {
            return Err(Error::MalformedManifest(format!(
                "mainModuleId {main_module_id} is not a known module"
            )));
        }
        Ok(Manifest {
            modules,
            main_module_id,
            main_function,
            signatures,
        })
    }

    pub fn modules(&self) -> &IndexMap<ModuleId, Module> {
        &self.modules
    }

    pub fn module(&self, id: &ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn main_module_id(&self) -> &ModuleId {
        &self.main_module_id
    }

    pub fn main_function(&self) -> Option<&str> {
        self.main_function.as_deref()
    }

    pub fn signatures(&self) -> &IndexMap<String, String> {
        &self.signatures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    fn module(url: &str, deps: &[&str]) -> Module {
        Module::new(
            url,
            Digest::of(url.as_bytes()),
            deps.iter().map(|d| ModuleId::new(*d)).collect(),
        )
    }

    #[test]
    fn create_sorts_topologically_and_defaults_main() {
        let manifest = Manifest::create(
            [
                (ModuleId::new("C"), module("c.zipline", &["B"])),
                (ModuleId::new("B"), module("b.zipline", &["A"])),
                (ModuleId::new("A"), module("a.zipline", &[])),
            ],
            None,
            None,
            IndexMap::new(),
        )
        .unwrap();

        let ids: Vec<&str> = manifest.modules().keys().map(ModuleId::as_str).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(manifest.main_module_id().as_str(), "C");
    }

    #[test]
    fn create_rejects_missing_dependency() {
        let err = Manifest::create(
            [(ModuleId::new("A"), module("a.zipline", &["ghost"]))],
            None,
            None,
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedManifest(_)));
    }

    #[test]
    fn create_rejects_bad_main_module_id() {
        let err = Manifest::create(
            [(ModuleId::new("A"), module("a.zipline", &[]))],
            Some(ModuleId::new("nope")),
            None,
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedManifest(_)));
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let manifest = Manifest::create(
            [
                (ModuleId::new("alpha"), module("alpha.zipline", &[])),
                (ModuleId::new("bravo"), module("bravo.zipline", &["alpha"])),
            ],
            None,
            Some("zipline.main()".to_string()),
            IndexMap::from([("prod".to_string(), "ab12".to_string())]),
        )
        .unwrap();

        let json = manifest.to_json().unwrap();
        let parsed = Manifest::parse(&json).unwrap();
        assert_eq!(manifest, parsed);
    }

    #[test]
    fn parse_rejects_out_of_order_modules() {
        let digest = Digest::of(b"x").to_hex();
        let json = format!(
            r#"{{
                "modules": {{
                    "bravo": {{"url": "b", "sha256": "{digest}", "dependsOnIds": ["alpha"]}},
                    "alpha": {{"url": "a", "sha256": "{digest}", "dependsOnIds": []}}
                }},
                "mainModuleId": "bravo"
            }}"#
        );
        assert!(Manifest::parse(&json).is_err());
    }

    #[test]
    fn parse_rejects_cycle() {
        let digest = Digest::of(b"x").to_hex();
        let json = format!(
            r#"{{
                "modules": {{
                    "a": {{"url": "a", "sha256": "{digest}", "dependsOnIds": ["b"]}},
                    "b": {{"url": "b", "sha256": "{digest}", "dependsOnIds": ["a"]}}
                }},
                "mainModuleId": "a"
            }}"#
        );
        assert!(Manifest::parse(&json).is_err());
    }
}
