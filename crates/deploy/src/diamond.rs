//! ABI encoding for the diamond's cut, loupe and initializer calls.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi},
    primitives::{Address, Bytes, FixedBytes},
    sol_types::{SolType, SolValue, sol_data},
};

use crate::{
    error::{Error, Result},
    planner::{CutAction, CutOperation},
    selector::Selector,
};

/// `diamondCut((address,uint8,bytes4[])[],address,bytes)`
pub const DIAMOND_CUT: Selector = Selector::from_u32(0x1f931c1c);

/// `facets()` from the loupe.
pub const FACETS: Selector = Selector::from_u32(0x7a0ed627);

type RawCut = (Address, u8, Vec<FixedBytes<4>>);
type RawCutCall = (Vec<RawCut>, Address, Bytes);
type RawCutCallSol = (
    sol_data::Array<(
        sol_data::Address,
        sol_data::Uint<8>,
        sol_data::Array<sol_data::FixedBytes<4>>,
    )>,
    sol_data::Address,
    sol_data::Bytes,
);

/// A decoded `diamondCut` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutCall {
    pub cuts: Vec<(Address, CutAction, Vec<Selector>)>,
    pub init: Address,
    pub calldata: Bytes,
}

impl CutCall {
    /// A cut applying `operations` without an initializer.
    pub fn from_operations(operations: &[CutOperation]) -> Self {
        Self {
            cuts: operations
                .iter()
                .map(|op| (op.cut_address(), op.action, op.selectors.clone()))
                .collect(),
            init: Address::ZERO,
            calldata: Bytes::new(),
        }
    }

    /// An empty cut that only delegates to `init` with `calldata`.
    pub fn initializer(init: Address, calldata: Bytes) -> Self {
        Self {
            cuts: Vec::new(),
            init,
            calldata,
        }
    }

    pub fn encode(&self) -> Bytes {
        let raw: RawCutCall = (
            self.cuts
                .iter()
                .map(|(address, action, selectors)| {
                    (
                        *address,
                        *action as u8,
                        selectors.iter().map(|s| **s).collect(),
                    )
                })
                .collect(),
            self.init,
            self.calldata.clone(),
        );

        let mut input = DIAMOND_CUT.to_vec();
        input.extend_from_slice(&RawCutCallSol::abi_encode_params(&raw));
        input.into()
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        let body = input
            .strip_prefix(DIAMOND_CUT.as_slice())
            .ok_or_else(|| Error::Network("not a diamondCut call".to_string()))?;

        let (cuts, init, calldata) = RawCutCallSol::abi_decode_params(body)
            .map_err(|e| Error::Network(format!("malformed diamondCut call: {}", e)))?;

        let cuts = cuts
            .into_iter()
            .map(|(address, action, selectors)| {
                let action = match action {
                    0 => CutAction::Add,
                    1 => CutAction::Replace,
                    2 => CutAction::Remove,
                    other => {
                        return Err(Error::Network(format!("unknown cut action {}", other)));
                    }
                };
                Ok((address, action, selectors.into_iter().map(Selector::from).collect()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cuts,
            init,
            calldata,
        })
    }
}

/// Calldata of the loupe's `facets()`.
pub fn facets_call() -> Bytes {
    Bytes::copy_from_slice(FACETS.as_slice())
}

pub fn encode_facets(facets: &[(Address, Vec<Selector>)]) -> Bytes {
    let raw: Vec<(Address, Vec<FixedBytes<4>>)> = facets
        .iter()
        .map(|(address, selectors)| (*address, selectors.iter().map(|s| **s).collect()))
        .collect();
    (raw,).abi_encode_params().into()
}

/// Decode the return data of `facets()`.
pub fn decode_facets(data: &[u8]) -> Result<Vec<(Address, Vec<Selector>)>> {
    let (facets,) = <(Vec<(Address, Vec<FixedBytes<4>>)>,)>::abi_decode_params(data)
        .map_err(|e| Error::Network(format!("malformed facets() response: {}", e)))?;

    Ok(facets
        .into_iter()
        .map(|(address, selectors)| (address, selectors.into_iter().map(Selector::from).collect()))
        .collect())
}

/// Proxy initcode: creation bytecode followed by the constructor arguments
/// `(owner, diamondCutFacet)`.
pub fn proxy_initcode(bytecode: &[u8], owner: Address, cut_facet: Address) -> Bytes {
    let mut initcode = bytecode.to_vec();
    initcode.extend_from_slice(&(owner, cut_facet).abi_encode_params());
    initcode.into()
}

/// Find the initializer function by name or full signature.
///
/// Overloads are disambiguated by the number of arguments.
pub fn find_function<'a>(abi: &'a JsonAbi, function: &str, arity: usize) -> Result<&'a Function> {
    let candidates: Vec<&Function> = match function.split_once('(') {
        Some((name, _)) => abi
            .function(name)
            .map(|overloads| {
                overloads
                    .iter()
                    .filter(|f| f.signature() == function)
                    .collect()
            })
            .unwrap_or_default(),
        None => abi
            .function(function)
            .map(|overloads| overloads.iter().filter(|f| f.inputs.len() == arity).collect())
            .unwrap_or_default(),
    };

    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::Config(format!(
            "initializer function {} taking {} argument(s) not found",
            function, arity
        ))),
        _ => Err(Error::Config(format!(
            "initializer function {} is overloaded, use its full signature",
            function
        ))),
    }
}

/// Encode the call to the initializer, coercing each string argument to the
/// parameter type declared in the ABI.
pub fn encode_init_call(abi: &JsonAbi, function: &str, args: &[String]) -> Result<Bytes> {
    let function = find_function(abi, function, args.len())?;

    if function.inputs.len() != args.len() {
        return Err(Error::Config(format!(
            "{} expects {} argument(s), got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        )));
    }

    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param.resolve().map_err(|e| {
                Error::Config(format!("unsupported parameter type {}: {}", param.ty, e))
            })?;
            ty.coerce_str(arg).map_err(|e| {
                Error::Config(format!(
                    "invalid value {:?} for parameter {} ({}): {}",
                    arg, param.name, param.ty, e
                ))
            })
        })
        .collect::<Result<Vec<DynSolValue>>>()?;

    function
        .abi_encode_input(&values)
        .map(Bytes::from)
        .map_err(|e| Error::Config(format!("failed to encode {}: {}", function.signature(), e)))
}
