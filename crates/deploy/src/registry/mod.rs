//! Facet registry: the desired composition as described by source and artifacts.
//!
//! Facet sources are matched by glob, scanned for their declared functions and
//! resolved against their compiled ABI to obtain canonical selectors. Only
//! functions a facet declares itself are routed, so inherited ABI entries and
//! introspection selectors such as `supportsInterface(bytes4)` never leak into
//! the composition unless the facet's own source declares them.

mod artifact;
mod source;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::{Function, Param},
    primitives::{Address, keccak256},
};

pub use artifact::{Artifact, ArtifactFormat};
pub use source::{FunctionDecl, Visibility};

use crate::{
    composition::{Composition, Facet},
    error::{Error, Result},
    selector::{RESERVED_INTROSPECTION, Selector},
};

/// Inputs of [`Registry::load`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Project root; patterns and source paths are relative to it.
    pub root: PathBuf,
    pub facet_patterns: Vec<String>,
    pub artifacts_dir: PathBuf,
    pub format: ArtifactFormat,
    pub public_methods: bool,
    pub core_facets: BTreeSet<String>,
    /// Facet installed by the proxy constructor. Loaded from its artifact
    /// when no source matches it.
    pub cut_facet: Option<String>,
}

/// A routed function of a facet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub selector: Selector,
    /// Canonical signature, e.g. `setValue(uint256,string)`.
    pub signature: String,
    /// The declaration in source, when the facet has one.
    pub decl: Option<FunctionDecl>,
}

/// A facet known to the registry.
#[derive(Debug, Clone)]
pub struct FacetSpec {
    pub name: String,
    /// Source path relative to the project root.
    pub source: Option<PathBuf>,
    pub core: bool,
    pub functions: Vec<FunctionSpec>,
    pub artifact: Artifact,
}

impl FacetSpec {
    pub fn selectors(&self) -> Vec<Selector> {
        let mut selectors: Vec<Selector> = self.functions.iter().map(|f| f.selector).collect();
        selectors.sort();
        selectors
    }

    /// The facet as deployed at `address`.
    pub fn facet(&self, address: Address) -> Facet {
        let facet = Facet::new(self.name.clone(), address, self.selectors());
        if self.core { facet.core() } else { facet }
    }
}

/// The facets of the project, in source path order.
#[derive(Debug, Clone)]
pub struct Registry {
    facets: Vec<FacetSpec>,
    artifacts_dir: PathBuf,
    format: ArtifactFormat,
}

impl Registry {
    pub fn load(options: &RegistryOptions) -> Result<Self> {
        let artifacts_dir = options.root.join(&options.artifacts_dir);
        let mut facets = Vec::new();

        for source in discover(&options.root, &options.facet_patterns)? {
            let facet = load_facet(options, &artifacts_dir, &source)?;
            tracing::debug!(
                facet = %facet.name,
                source = %source.display(),
                functions = facet.functions.len(),
                "Facet loaded"
            );
            facets.push(facet);
        }

        if let Some(cut_facet) = &options.cut_facet
            && !facets.iter().any(|f| &f.name == cut_facet)
        {
            let artifact = Artifact::find(options.format, &artifacts_dir, cut_facet)?;
            facets.push(FacetSpec {
                name: cut_facet.clone(),
                source: None,
                core: true,
                functions: abi_functions(&artifact),
                artifact,
            });
        }

        let registry = Self {
            facets,
            artifacts_dir,
            format: options.format,
        };
        registry.check_conflicts()?;

        tracing::info!(facets = registry.facets.len(), "Facet registry loaded");
        Ok(registry)
    }

    /// Build a registry from already loaded facets.
    pub fn from_facets(facets: Vec<FacetSpec>, artifacts_dir: PathBuf, format: ArtifactFormat) -> Result<Self> {
        let registry = Self {
            facets,
            artifacts_dir,
            format,
        };
        registry.check_conflicts()?;
        Ok(registry)
    }

    pub fn facets(&self) -> &[FacetSpec] {
        &self.facets
    }

    pub fn facet(&self, name: &str) -> Option<&FacetSpec> {
        self.facets.iter().find(|f| f.name == name)
    }

    /// Load a non-facet contract artifact, such as the proxy or the initializer.
    pub fn artifact(&self, contract: &str) -> Result<Artifact> {
        Artifact::find(self.format, &self.artifacts_dir, contract)
    }

    /// Reject selectors shared by two facets.
    pub fn check_conflicts(&self) -> Result<()> {
        let placeholders: Vec<Facet> = self
            .facets
            .iter()
            .map(|f| f.facet(Address::from_word(keccak256(f.name.as_bytes()))))
            .collect();
        Composition::from_facets(&placeholders)?;
        Ok(())
    }

    /// The desired composition given each facet's deployment address.
    pub fn composition(&self, addresses: &BTreeMap<String, Address>) -> Result<Composition> {
        let facets = self
            .facets
            .iter()
            .map(|spec| {
                addresses
                    .get(&spec.name)
                    .map(|address| spec.facet(*address))
                    .ok_or_else(|| Error::Config(format!("no address for facet {}", spec.name)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Composition::from_facets(&facets)?)
    }
}

/// Source files matched by `patterns`, sorted, relative to `root`.
fn discover(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut sources = BTreeSet::new();

    for pattern in patterns {
        let full = root.join(pattern);
        let entries = glob::glob(&full.to_string_lossy())
            .map_err(|e| Error::Config(format!("invalid facet pattern {}: {}", pattern, e)))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::Build(format!("failed to read facet source: {}", e)))?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            sources.insert(relative);
        }
    }

    if sources.is_empty() {
        tracing::warn!(patterns = ?patterns, "No facet sources matched");
    }

    Ok(sources.into_iter().collect())
}

fn load_facet(options: &RegistryOptions, artifacts_dir: &Path, source: &Path) -> Result<FacetSpec> {
    let full_path = options.root.join(source);
    let content = std::fs::read_to_string(&full_path)
        .map_err(|e| Error::Build(format!("failed to read {}: {}", full_path.display(), e)))?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let contract = source::select_contract(source::parse_contracts(&content), &stem)
        .ok_or_else(|| Error::Build(format!("no contract declared in {}", source.display())))?;

    let artifact_path = options.format.path_for(artifacts_dir, source, &contract.name);
    let artifact = Artifact::load(&artifact_path, &contract.name)?;
    artifact.ensure_fresh(&full_path)?;

    let mut functions = Vec::new();
    for decl in contract.functions {
        let routed = match decl.visibility {
            Visibility::External => true,
            Visibility::Public => options.public_methods,
            Visibility::Internal | Visibility::Private => false,
        };
        if !routed {
            continue;
        }

        let abi_function = resolve(&artifact, &decl)?;
        functions.push(FunctionSpec {
            selector: Selector::from(abi_function.selector()),
            signature: abi_function.signature(),
            decl: Some(decl),
        });
    }

    Ok(FacetSpec {
        core: options.core_facets.contains(&contract.name),
        name: contract.name,
        source: Some(source.to_path_buf()),
        functions,
        artifact,
    })
}

/// Match a declaration to its ABI entry by name, arity and, for overloads,
/// parameter types.
fn resolve<'a>(artifact: &'a Artifact, decl: &FunctionDecl) -> Result<&'a Function> {
    let stale = || {
        Error::Build(format!(
            "{}.{} is not in the ABI at {}, rebuild first",
            artifact.contract,
            decl.name,
            artifact.path.display()
        ))
    };

    let candidates: Vec<&Function> = artifact
        .abi
        .function(&decl.name)
        .ok_or_else(stale)?
        .iter()
        .filter(|f| f.inputs.len() == decl.param_count())
        .collect();

    match candidates.as_slice() {
        [] => Err(stale()),
        [only] => Ok(*only),
        many => {
            let types = decl.param_types();
            many.iter()
                .copied()
                .find(|f| f.inputs.iter().zip(&types).all(|(param, ty)| type_matches(param, ty)))
                .ok_or_else(|| {
                    Error::Build(format!(
                        "cannot tell overloads of {}.{} apart",
                        artifact.contract, decl.name
                    ))
                })
        }
    }
}

fn type_matches(param: &Param, declared: &str) -> bool {
    // User defined types (structs, enums, contracts) lower to ABI types the
    // declaration does not spell out.
    let user_defined = declared.contains('.') || declared.starts_with(char::is_uppercase);
    user_defined || param.ty == declared
}

/// Functions of an ABI-only facet.
fn abi_functions(artifact: &Artifact) -> Vec<FunctionSpec> {
    artifact
        .abi
        .functions()
        .map(|f| FunctionSpec {
            selector: Selector::from(f.selector()),
            signature: f.signature(),
            decl: None,
        })
        .filter(|f| !RESERVED_INTROSPECTION.contains(&f.selector))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn abi_entry(name: &str, inputs: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "name": name,
            "stateMutability": "nonpayable",
            "outputs": [],
            "inputs": inputs.iter().map(|ty| serde_json::json!({"name": "", "type": ty})).collect::<Vec<_>>(),
        })
    }

    fn diamond_cut_entry() -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "name": "diamondCut",
            "stateMutability": "nonpayable",
            "outputs": [],
            "inputs": [
                {
                    "name": "cuts",
                    "type": "tuple[]",
                    "components": [
                        {"name": "facetAddress", "type": "address"},
                        {"name": "action", "type": "uint8"},
                        {"name": "functionSelectors", "type": "bytes4[]"}
                    ]
                },
                {"name": "init", "type": "address"},
                {"name": "data", "type": "bytes"}
            ],
        })
    }

    fn write_artifact(root: &Path, file: &str, contract: &str, abi: Vec<serde_json::Value>) {
        write(
            root,
            &format!("out/{}/{}.json", file, contract),
            &serde_json::json!({
                "abi": abi,
                "bytecode": { "object": "0x6080" },
                "deployedBytecode": { "object": "0x6001", "immutableReferences": {} }
            })
            .to_string(),
        );
    }

    fn options(root: &Path) -> RegistryOptions {
        RegistryOptions {
            root: root.to_path_buf(),
            facet_patterns: vec!["src/facets/*Facet.sol".to_string()],
            artifacts_dir: PathBuf::from("out"),
            format: ArtifactFormat::Foundry,
            public_methods: false,
            core_facets: BTreeSet::from(["DiamondCutFacet".to_string()]),
            cut_facet: None,
        }
    }

    fn project() -> TempDir {
        let temp_dir = TempDir::new("facetsmith-registry").unwrap();
        let root = temp_dir.path();

        write(
            root,
            "src/facets/CounterFacet.sol",
            r#"
contract CounterFacet is Base {
    function increment(uint by) external {}
    function current() public view returns (uint256) {}
    function _bump() internal {}
}
"#,
        );
        write_artifact(
            root,
            "CounterFacet.sol",
            "CounterFacet",
            vec![
                abi_entry("increment", &["uint256"]),
                abi_entry("current", &[]),
                // inherited from Base
                abi_entry("supportsInterface", &["bytes4"]),
            ],
        );

        write(
            root,
            "src/facets/DiamondCutFacet.sol",
            r#"
contract DiamondCutFacet {
    function diamondCut(FacetCut[] calldata cuts, address init, bytes calldata data) external {}
}
"#,
        );
        write_artifact(
            root,
            "DiamondCutFacet.sol",
            "DiamondCutFacet",
            vec![diamond_cut_entry()],
        );

        temp_dir
    }

    #[test]
    fn test_only_declared_external_functions_are_routed() {
        let temp_dir = project();
        let registry = Registry::load(&options(temp_dir.path())).unwrap();

        let names: Vec<_> = registry.facets().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["CounterFacet", "DiamondCutFacet"]);

        let counter = registry.facet("CounterFacet").unwrap();
        assert_eq!(counter.selectors(), vec![Selector::from_signature("increment(uint256)")]);
        assert!(!counter.core);

        let cut = registry.facet("DiamondCutFacet").unwrap();
        assert!(cut.core);
        assert_eq!(cut.selectors(), vec![Selector::from_u32(0x1f931c1c)]);
    }

    #[test]
    fn test_public_methods_are_opt_in() {
        let temp_dir = project();
        let mut options = options(temp_dir.path());
        options.public_methods = true;

        let registry = Registry::load(&options).unwrap();
        let counter = registry.facet("CounterFacet").unwrap();
        assert_eq!(counter.functions.len(), 2);
        assert!(counter.selectors().contains(&Selector::from_signature("current()")));
        assert!(!counter.selectors().contains(&crate::selector::SUPPORTS_INTERFACE));
    }

    #[test]
    fn test_missing_artifact_is_reported() {
        let temp_dir = project();
        write(
            temp_dir.path(),
            "src/facets/OrphanFacet.sol",
            "contract OrphanFacet { function orphan() external {} }",
        );

        let err = Registry::load(&options(temp_dir.path())).unwrap_err();
        match err {
            Error::MissingArtifact { contract, path } => {
                assert_eq!(contract, "OrphanFacet");
                assert!(path.ends_with("out/OrphanFacet.sol/OrphanFacet.json"));
            }
            other => panic!("expected a missing artifact, got {}", other),
        }
    }

    #[test]
    fn test_declaration_missing_from_abi_is_stale() {
        let temp_dir = project();
        write(
            temp_dir.path(),
            "src/facets/StaleFacet.sol",
            "contract StaleFacet { function added() external {} }",
        );
        write_artifact(temp_dir.path(), "StaleFacet.sol", "StaleFacet", vec![]);

        let err = Registry::load(&options(temp_dir.path())).unwrap_err();
        assert!(matches!(err, Error::Build(_)));
        assert!(err.to_string().contains("StaleFacet.added"));
    }

    #[test]
    fn test_shared_selector_is_a_conflict() {
        let temp_dir = project();
        write(
            temp_dir.path(),
            "src/facets/OtherFacet.sol",
            "contract OtherFacet { function increment(uint256 by) external {} }",
        );
        write_artifact(
            temp_dir.path(),
            "OtherFacet.sol",
            "OtherFacet",
            vec![abi_entry("increment", &["uint256"])],
        );

        match Registry::load(&options(temp_dir.path())).unwrap_err() {
            Error::Conflict(conflict) => {
                assert_eq!(conflict.first, "CounterFacet");
                assert_eq!(conflict.second, "OtherFacet");
                assert_eq!(conflict.selector, Selector::from_signature("increment(uint256)"));
            }
            other => panic!("expected a conflict, got {}", other),
        }
    }

    #[test]
    fn test_cut_facet_is_loaded_from_artifact_when_not_in_sources() {
        let temp_dir = project();
        std::fs::remove_file(temp_dir.path().join("src/facets/DiamondCutFacet.sol")).unwrap();
        let mut options = options(temp_dir.path());
        options.cut_facet = Some("DiamondCutFacet".to_string());

        let registry = Registry::load(&options).unwrap();
        let cut = registry.facet("DiamondCutFacet").unwrap();
        assert!(cut.source.is_none());
        assert!(cut.core);
        assert_eq!(cut.selectors(), vec![Selector::from_u32(0x1f931c1c)]);
    }

    #[test]
    fn test_overloads_are_told_apart_by_type() {
        let temp_dir = project();
        write(
            temp_dir.path(),
            "src/facets/OverloadFacet.sol",
            "contract OverloadFacet { function put(address who) external {} function put(uint amount) external {} }",
        );
        write_artifact(
            temp_dir.path(),
            "OverloadFacet.sol",
            "OverloadFacet",
            vec![abi_entry("put", &["address"]), abi_entry("put", &["uint256"])],
        );

        let registry = Registry::load(&options(temp_dir.path())).unwrap();
        let facet = registry.facet("OverloadFacet").unwrap();
        assert_eq!(
            facet.selectors(),
            {
                let mut expected = vec![
                    Selector::from_signature("put(address)"),
                    Selector::from_signature("put(uint256)"),
                ];
                expected.sort();
                expected
            }
        );
    }

    #[test]
    fn test_composition_uses_given_addresses() {
        let temp_dir = project();
        let registry = Registry::load(&options(temp_dir.path())).unwrap();

        let counter = Address::repeat_byte(0x01);
        let cut = Address::repeat_byte(0x02);
        let composition = registry
            .composition(&BTreeMap::from([
                ("CounterFacet".to_string(), counter),
                ("DiamondCutFacet".to_string(), cut),
            ]))
            .unwrap();

        assert_eq!(composition.len(), 2);
        assert_eq!(composition.get(&Selector::from_u32(0x1f931c1c)), Some(cut));
        assert_eq!(composition.name_of(counter), Some("CounterFacet"));
    }
}
