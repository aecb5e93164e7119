//! Generation of the aggregated `IDiamondProxy` Solidity interface.

use std::path::{Path, PathBuf};

use alloy_core::json_abi::{Function, Param, StateMutability};

use crate::{
    error::Result,
    fs::FsHandler,
    registry::{FacetSpec, FunctionDecl, FunctionSpec, Registry, Visibility},
    selector::Selector,
};

/// File name of the generated interface.
pub const INTERFACE_FILE: &str = "IDiamondProxy.sol";

const BANNER: &str = "\
/// ------------------------------------------------------------------------------------------------------------
///
/// NOTE: This file is auto-generated by facetsmith, please DO NOT modify!
///
/// ------------------------------------------------------------------------------------------------------------";

/// Header settings of generated Solidity files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceOptions {
    pub license: String,
    pub solc_version: String,
    pub imports: Vec<String>,
}

/// Render the interface for every facet. Functions declared in source keep
/// their source signature; facets known only from an artifact are rendered
/// from its ABI.
pub fn render(registry: &Registry, options: &InterfaceOptions) -> String {
    let mut out = String::new();

    out.push_str(&format!("// SPDX-License-Identifier: {}\n", options.license));
    out.push_str(&format!("pragma solidity >={};\n\n", options.solc_version));
    out.push_str(BANNER);
    out.push_str("\n\n");

    if !options.imports.is_empty() {
        for import in &options.imports {
            out.push_str(&format!("import \"{}\";\n", import));
        }
        out.push('\n');
    }

    out.push_str("interface IDiamondProxy {\n");

    let mut first = true;
    for facet in registry.facets() {
        let decls: Vec<FunctionDecl> = facet.functions.iter().filter_map(|f| facet_decl(facet, f)).collect();
        if decls.is_empty() {
            continue;
        }

        if !first {
            out.push('\n');
        }
        first = false;

        out.push_str(&format!("  // {}\n", facet.name));
        for decl in &decls {
            out.push_str(&format!("  {}\n", render_function(decl)));
        }
    }

    out.push_str("}\n");
    out
}

fn facet_decl(facet: &FacetSpec, function: &FunctionSpec) -> Option<FunctionDecl> {
    if let Some(decl) = &function.decl {
        return Some(decl.clone());
    }

    let found = facet
        .artifact
        .abi
        .functions()
        .find(|f| Selector::from(f.selector()) == function.selector)
        .map(abi_decl);
    if found.is_none() {
        tracing::warn!(
            facet = %facet.name,
            signature = %function.signature,
            "Function missing from the artifact ABI, left out of the interface"
        );
    }
    found
}

/// A declaration rebuilt from an ABI entry.
fn abi_decl(function: &Function) -> FunctionDecl {
    let mutability = match function.state_mutability {
        StateMutability::Pure => Some("pure"),
        StateMutability::View => Some("view"),
        StateMutability::Payable => Some("payable"),
        StateMutability::NonPayable => None,
    };
    let returns = (!function.outputs.is_empty()).then(|| abi_params(&function.outputs));

    FunctionDecl {
        name: function.name.clone(),
        params: abi_params(&function.inputs),
        visibility: Visibility::External,
        mutability: mutability.map(str::to_string),
        returns,
    }
}

fn abi_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|param| {
            // Struct and enum parameters are named by their Solidity type.
            let ty = match param.internal_type() {
                Some(internal) if param.is_struct() || param.is_enum() => {
                    let name = internal.to_string();
                    ["struct ", "enum ", "contract "]
                        .iter()
                        .find_map(|prefix| name.strip_prefix(prefix))
                        .map(str::to_string)
                        .unwrap_or(name)
                }
                _ => param.ty.clone(),
            };

            let mut rendered = ty;
            if param.ty.ends_with(']') || param.ty.starts_with("tuple") || param.ty == "string" || param.ty == "bytes" {
                rendered.push_str(" memory");
            }
            if !param.name.is_empty() {
                rendered.push(' ');
                rendered.push_str(&param.name);
            }
            rendered
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One interface line: visibility forced to `external`, modifiers dropped.
fn render_function(decl: &FunctionDecl) -> String {
    let mut line = format!("function {}({}) external", decl.name, decl.params);
    if let Some(mutability) = &decl.mutability {
        line.push(' ');
        line.push_str(mutability);
    }
    if let Some(returns) = &decl.returns {
        line.push_str(&format!(" returns ({})", returns));
    }
    line.push(';');
    line
}

/// Write the interface into `dir`, leaving the file untouched when unchanged.
/// Returns the path and whether the file was written.
pub fn generate(registry: &Registry, options: &InterfaceOptions, dir: &Path) -> Result<(PathBuf, bool)> {
    let path = dir.join(INTERFACE_FILE);
    let written = FsHandler::write_if_changed(&path, &render(registry, options))?;

    if written {
        tracing::info!(path = %path.display(), "Proxy interface generated");
    }

    Ok((path, written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        registry::{Artifact, ArtifactFormat, FacetSpec, FunctionSpec, Visibility},
        selector::Selector,
    };
    use alloy_core::primitives::Bytes;
    use tempdir::TempDir;

    fn decl(name: &str, params: &str, visibility: Visibility, mutability: Option<&str>, returns: Option<&str>) -> FunctionSpec {
        FunctionSpec {
            selector: Selector::from_signature(&format!("{}()", name)),
            signature: format!("{}()", name),
            decl: Some(FunctionDecl {
                name: name.to_string(),
                params: params.to_string(),
                visibility,
                mutability: mutability.map(str::to_string),
                returns: returns.map(str::to_string),
            }),
        }
    }

    fn facet(name: &str, functions: Vec<FunctionSpec>) -> FacetSpec {
        FacetSpec {
            name: name.to_string(),
            source: Some(PathBuf::from(format!("src/facets/{}.sol", name))),
            core: false,
            functions,
            artifact: Artifact {
                contract: name.to_string(),
                path: PathBuf::new(),
                abi: Default::default(),
                bytecode: Bytes::new(),
                deployed_bytecode: Bytes::new(),
                has_immutables: false,
            },
        }
    }

    fn registry() -> Registry {
        Registry::from_facets(
            vec![
                facet(
                    "CounterFacet",
                    vec![
                        decl("increment", "uint by", Visibility::External, None, None),
                        decl("current", "", Visibility::Public, Some("view"), Some("uint256")),
                    ],
                ),
                facet(
                    "PayFacet",
                    vec![decl("pay", "address to", Visibility::External, Some("payable"), None)],
                ),
            ],
            PathBuf::from("out"),
            ArtifactFormat::Foundry,
        )
        .unwrap()
    }

    fn options() -> InterfaceOptions {
        InterfaceOptions {
            license: "MIT".to_string(),
            solc_version: "0.8.21".to_string(),
            imports: vec!["src/shared/Structs.sol".to_string()],
        }
    }

    #[test]
    fn test_render_interface() {
        let rendered = render(&registry(), &options());

        assert!(rendered.starts_with("// SPDX-License-Identifier: MIT\npragma solidity >=0.8.21;\n"));
        assert!(rendered.contains("DO NOT modify"));
        assert!(rendered.contains("import \"src/shared/Structs.sol\";\n"));
        assert!(rendered.contains(
            "interface IDiamondProxy {\n  // CounterFacet\n  function increment(uint by) external;\n  function current() external view returns (uint256);\n\n  // PayFacet\n  function pay(address to) external payable;\n}\n"
        ));
    }

    #[test]
    fn test_abi_only_facet_is_rendered_from_its_abi() {
        let abi: alloy_core::json_abi::JsonAbi = serde_json::from_str(
            r#"[
                {"type":"function","name":"diamondCut","stateMutability":"nonpayable","outputs":[],
                 "inputs":[
                    {"name":"_diamondCut","type":"tuple[]","internalType":"struct IDiamondCut.FacetCut[]",
                     "components":[
                        {"name":"facetAddress","type":"address","internalType":"address"},
                        {"name":"action","type":"uint8","internalType":"enum IDiamondCut.FacetCutAction"},
                        {"name":"functionSelectors","type":"bytes4[]","internalType":"bytes4[]"}]},
                    {"name":"_init","type":"address","internalType":"address"},
                    {"name":"_calldata","type":"bytes","internalType":"bytes"}]},
                {"type":"function","name":"owner","stateMutability":"view","inputs":[],
                 "outputs":[{"name":"owner_","type":"address","internalType":"address"}]}
            ]"#,
        )
        .unwrap();

        let mut cut = facet(
            "DiamondCutFacet",
            abi.functions()
                .map(|f| FunctionSpec {
                    selector: Selector::from(f.selector()),
                    signature: f.signature(),
                    decl: None,
                })
                .collect(),
        );
        cut.source = None;
        cut.artifact.abi = abi;

        let registry = Registry::from_facets(vec![cut], PathBuf::from("out"), ArtifactFormat::Foundry).unwrap();
        let rendered = render(&registry, &options());

        assert!(rendered.contains(
            "  // DiamondCutFacet\n  function diamondCut(IDiamondCut.FacetCut[] memory _diamondCut, address _init, bytes memory _calldata) external;\n  function owner() external view returns (address owner_);\n"
        ));
    }

    #[test]
    fn test_generate_is_idempotent() {
        let temp_dir = TempDir::new("facetsmith-interface").unwrap();
        let dir = temp_dir.path().join("src/generated");

        let (path, written) = generate(&registry(), &options(), &dir).unwrap();
        assert!(written);
        assert!(path.ends_with(INTERFACE_FILE));

        let (_, written) = generate(&registry(), &options(), &dir).unwrap();
        assert!(!written);
    }
}
