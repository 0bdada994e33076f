//! Router and pool calldata decoding.
//!
//! Dispatches on the 4-byte selector and resolves the swap against the
//! monitored pool set. Multicalls are unwrapped to the first supported
//! inner swap; multi-hop paths are scored on their first hop only.

use std::collections::HashMap;
use std::sync::Arc;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, I256, U256};
use jitflow_types::{DecodedCall, DropReason, FeeTier, PoolDescriptor, SwapDirection};

/// `exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))`
pub const SEL_EXACT_INPUT_SINGLE: [u8; 4] = [0x41, 0x4b, 0xf3, 0x89];
/// Router02 variant without the deadline field.
pub const SEL_EXACT_INPUT_SINGLE_02: [u8; 4] = [0x04, 0xe4, 0x5a, 0xaf];
/// `exactInput((bytes,address,uint256,uint256,uint256))`
pub const SEL_EXACT_INPUT: [u8; 4] = [0xc0, 0x4b, 0x8d, 0x59];
/// `multicall(bytes[])`
pub const SEL_MULTICALL: [u8; 4] = [0xac, 0x96, 0x50, 0xd8];
/// `multicall(uint256,bytes[])`
pub const SEL_MULTICALL_DEADLINE: [u8; 4] = [0x5a, 0xe4, 0x01, 0xdc];
/// Direct pool `swap(address,bool,int256,uint160,bytes)`
pub const SEL_POOL_SWAP: [u8; 4] = [0x12, 0x8a, 0xcb, 0x08];

/// Multicall nesting depth we are willing to unwrap.
const MAX_MULTICALL_DEPTH: usize = 2;

/// Bytes per path hop step: 20-byte token + 3-byte fee.
const PATH_STEP: usize = 23;
const PATH_MIN: usize = PATH_STEP + 20;

/// Monitored-pool lookup tables.
pub struct PoolIndex {
    by_address: HashMap<Address, Arc<PoolDescriptor>>,
    by_tokens: HashMap<(Address, Address, u32), Arc<PoolDescriptor>>,
    routers: Vec<Address>,
}

impl PoolIndex {
    pub fn new(descriptors: Vec<PoolDescriptor>, routers: Vec<Address>) -> Self {
        let mut by_address = HashMap::new();
        let mut by_tokens = HashMap::new();
        for descriptor in descriptors {
            let descriptor = Arc::new(descriptor);
            by_address.insert(descriptor.address, descriptor.clone());
            by_tokens.insert(
                (
                    descriptor.token0,
                    descriptor.token1,
                    descriptor.fee_tier.as_raw(),
                ),
                descriptor.clone(),
            );
        }
        Self {
            by_address,
            by_tokens,
            routers,
        }
    }

    pub fn pool(&self, address: Address) -> Option<&Arc<PoolDescriptor>> {
        self.by_address.get(&address)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<PoolDescriptor>> {
        self.by_address.values()
    }

    pub fn is_router(&self, address: Address) -> bool {
        self.routers.contains(&address)
    }

    /// Look up by `(token_in, token_out, fee)`, falling back to the
    /// reversed key. The direction comes from which key matched.
    pub fn by_swap_leg(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
    ) -> Option<(&Arc<PoolDescriptor>, SwapDirection)> {
        if let Some(descriptor) = self.by_tokens.get(&(token_in, token_out, fee)) {
            return Some((descriptor, SwapDirection::Token0ToToken1));
        }
        self.by_tokens
            .get(&(token_out, token_in, fee))
            .map(|descriptor| (descriptor, SwapDirection::Token1ToToken0))
    }
}

/// A decoded call resolved against a monitored pool.
#[derive(Debug, Clone)]
pub struct ResolvedSwap {
    pub call: DecodedCall,
    pub descriptor: Arc<PoolDescriptor>,
    pub direction: SwapDirection,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub min_amount_out: Option<U256>,
    pub fee_tier: FeeTier,
}

/// Decode `input` sent to `to`, resolving to a monitored pool.
pub fn decode_transaction(
    to: Address,
    input: &[u8],
    index: &PoolIndex,
) -> Result<ResolvedSwap, DropReason> {
    if index.is_router(to) {
        decode_router_call(input, index, 0)
    } else if index.pool(to).is_some() {
        decode_pool_swap(to, input, index)
    } else {
        Err(DropReason::NotUniswapV3)
    }
}

fn selector(input: &[u8]) -> Option<[u8; 4]> {
    input.get(..4).map(|s| {
        let mut sel = [0u8; 4];
        sel.copy_from_slice(s);
        sel
    })
}

fn decode_router_call(
    input: &[u8],
    index: &PoolIndex,
    depth: usize,
) -> Result<ResolvedSwap, DropReason> {
    let sel = selector(input).ok_or(DropReason::UnsupportedMethod)?;
    let data = &input[4..];

    match sel {
        SEL_EXACT_INPUT_SINGLE => decode_exact_input_single(data, index, true),
        SEL_EXACT_INPUT_SINGLE_02 => decode_exact_input_single(data, index, false),
        SEL_EXACT_INPUT => decode_exact_input(data, index),
        SEL_MULTICALL => decode_multicall(data, index, depth, false),
        SEL_MULTICALL_DEADLINE => decode_multicall(data, index, depth, true),
        _ => Err(DropReason::UnsupportedMethod),
    }
}

fn decode_exact_input_single(
    data: &[u8],
    index: &PoolIndex,
    with_deadline: bool,
) -> Result<ResolvedSwap, DropReason> {
    // The params struct is all-static, so it decodes as a flat field list.
    let mut fields = vec![
        ParamType::Address,   // tokenIn
        ParamType::Address,   // tokenOut
        ParamType::Uint(24),  // fee
        ParamType::Address,   // recipient
    ];
    if with_deadline {
        fields.push(ParamType::Uint(256)); // deadline
    }
    fields.extend([
        ParamType::Uint(256), // amountIn
        ParamType::Uint(256), // amountOutMinimum
        ParamType::Uint(160), // sqrtPriceLimitX96
    ]);

    let tokens = decode(&fields, data).map_err(|_| DropReason::UnsupportedMethod)?;
    let mut tokens = tokens.into_iter();

    let token_in = take_address(&mut tokens)?;
    let token_out = take_address(&mut tokens)?;
    let fee_word = take_uint(&mut tokens)?;
    // The decoder hands back a full word; anything past 24 bits is junk.
    if fee_word > U256::from(0x00ff_ffffu32) {
        return Err(DropReason::UnsupportedMethod);
    }
    let fee = fee_word.as_u32();
    let recipient = take_address(&mut tokens)?;
    if with_deadline {
        let _deadline = take_uint(&mut tokens)?;
    }
    let amount_in = take_uint(&mut tokens)?;
    let amount_out_minimum = take_uint(&mut tokens)?;
    let sqrt_price_limit_x96 = take_uint(&mut tokens)?;

    let (descriptor, direction) = index
        .by_swap_leg(token_in, token_out, fee)
        .ok_or(DropReason::PoolNotMonitored)?;
    let fee_tier = FeeTier::from_raw(fee).map_err(|_| DropReason::PoolNotMonitored)?;

    Ok(ResolvedSwap {
        call: DecodedCall::ExactInputSingle {
            token_in,
            token_out,
            fee,
            recipient,
            amount_in,
            amount_out_minimum,
            sqrt_price_limit_x96,
        },
        descriptor: descriptor.clone(),
        direction,
        token_in,
        token_out,
        amount_in,
        min_amount_out: Some(amount_out_minimum),
        fee_tier,
    })
}

fn decode_exact_input(data: &[u8], index: &PoolIndex) -> Result<ResolvedSwap, DropReason> {
    // Dynamic struct: decodes as one tuple behind an offset.
    let fields = ParamType::Tuple(vec![
        ParamType::Bytes,     // path
        ParamType::Address,   // recipient
        ParamType::Uint(256), // deadline
        ParamType::Uint(256), // amountIn
        ParamType::Uint(256), // amountOutMinimum
    ]);
    let tokens = decode(&[fields], data).map_err(|_| DropReason::UnsupportedMethod)?;
    let inner = match tokens.into_iter().next() {
        Some(Token::Tuple(inner)) => inner,
        _ => return Err(DropReason::UnsupportedMethod),
    };
    let mut inner = inner.into_iter();

    let path = match inner.next() {
        Some(Token::Bytes(path)) => path,
        _ => return Err(DropReason::UnsupportedMethod),
    };
    let _recipient = take_address(&mut inner)?;
    let _deadline = take_uint(&mut inner)?;
    let amount_in = take_uint(&mut inner)?;
    let amount_out_minimum = take_uint(&mut inner)?;

    let (token_in, fee, token_out, hops) = decode_first_hop(&path)?;

    let (descriptor, direction) = index
        .by_swap_leg(token_in, token_out, fee)
        .ok_or(DropReason::PoolNotMonitored)?;
    let fee_tier = FeeTier::from_raw(fee).map_err(|_| DropReason::PoolNotMonitored)?;

    Ok(ResolvedSwap {
        call: DecodedCall::ExactInput {
            token_in,
            token_out,
            fee,
            amount_in,
            amount_out_minimum,
            hops,
        },
        descriptor: descriptor.clone(),
        direction,
        token_in,
        token_out,
        amount_in,
        // The path minimum guards the final hop, not the first one.
        min_amount_out: if hops == 1 { Some(amount_out_minimum) } else { None },
        fee_tier,
    })
}

/// `token(20) | fee(3) | token(20) | fee(3) | token(20) …`
fn decode_first_hop(path: &[u8]) -> Result<(Address, u32, Address, usize), DropReason> {
    if path.len() < PATH_MIN || (path.len() - 20) % PATH_STEP != 0 {
        return Err(DropReason::UnsupportedMethod);
    }
    let token_in = Address::from_slice(&path[..20]);
    let fee = u32::from(path[20]) << 16 | u32::from(path[21]) << 8 | u32::from(path[22]);
    let token_out = Address::from_slice(&path[23..43]);
    let hops = (path.len() - 20) / PATH_STEP;
    Ok((token_in, fee, token_out, hops))
}

fn decode_multicall(
    data: &[u8],
    index: &PoolIndex,
    depth: usize,
    with_deadline: bool,
) -> Result<ResolvedSwap, DropReason> {
    if depth >= MAX_MULTICALL_DEPTH {
        return Err(DropReason::UnsupportedMethod);
    }

    let mut fields = Vec::new();
    if with_deadline {
        fields.push(ParamType::Uint(256));
    }
    fields.push(ParamType::Array(Box::new(ParamType::Bytes)));

    let tokens = decode(&fields, data).map_err(|_| DropReason::UnsupportedMethod)?;
    let calls = match tokens.into_iter().last() {
        Some(Token::Array(calls)) => calls,
        _ => return Err(DropReason::UnsupportedMethod),
    };

    // First supported inner swap wins; the rest of the multicall is
    // settlement plumbing (unwrap, sweep, refund).
    for call in calls {
        let Token::Bytes(inner) = call else {
            return Err(DropReason::UnsupportedMethod);
        };
        if let Ok(resolved) = decode_router_call(&inner, index, depth + 1) {
            return Ok(ResolvedSwap {
                call: DecodedCall::Multicall {
                    inner: Box::new(resolved.call.clone()),
                },
                ..resolved
            });
        }
    }

    Err(DropReason::UnsupportedMethod)
}

fn decode_pool_swap(
    pool: Address,
    input: &[u8],
    index: &PoolIndex,
) -> Result<ResolvedSwap, DropReason> {
    let sel = selector(input).ok_or(DropReason::UnsupportedMethod)?;
    if sel != SEL_POOL_SWAP {
        return Err(DropReason::UnsupportedMethod);
    }

    let fields = [
        ParamType::Address,   // recipient
        ParamType::Bool,      // zeroForOne
        ParamType::Int(256),  // amountSpecified
        ParamType::Uint(160), // sqrtPriceLimitX96
        ParamType::Bytes,     // data
    ];
    let tokens = decode(&fields, &input[4..]).map_err(|_| DropReason::UnsupportedMethod)?;
    let mut tokens = tokens.into_iter();

    let recipient = take_address(&mut tokens)?;
    let zero_for_one = match tokens.next() {
        Some(Token::Bool(b)) => b,
        _ => return Err(DropReason::UnsupportedMethod),
    };
    let amount_specified = match tokens.next() {
        Some(Token::Int(raw)) => I256::from_raw(raw),
        _ => return Err(DropReason::UnsupportedMethod),
    };
    let sqrt_price_limit_x96 = take_uint(&mut tokens)?;

    let descriptor = index.pool(pool).ok_or(DropReason::PoolNotMonitored)?;

    let (token_in, token_out, direction) = if zero_for_one {
        (
            descriptor.token0,
            descriptor.token1,
            SwapDirection::Token0ToToken1,
        )
    } else {
        (
            descriptor.token1,
            descriptor.token0,
            SwapDirection::Token1ToToken0,
        )
    };

    // Positive is exact-input, negative exact-output; either way the
    // magnitude is what moves through the pool.
    let amount_in = amount_specified.unsigned_abs();

    Ok(ResolvedSwap {
        call: DecodedCall::DirectPoolSwap {
            pool,
            recipient,
            zero_for_one,
            amount_specified,
            sqrt_price_limit_x96,
        },
        descriptor: descriptor.clone(),
        direction,
        token_in,
        token_out,
        amount_in,
        min_amount_out: None,
        fee_tier: descriptor.fee_tier,
    })
}

fn take_address(tokens: &mut impl Iterator<Item = Token>) -> Result<Address, DropReason> {
    match tokens.next() {
        Some(Token::Address(address)) => Ok(address),
        _ => Err(DropReason::UnsupportedMethod),
    }
}

fn take_uint(tokens: &mut impl Iterator<Item = Token>) -> Result<U256, DropReason> {
    match tokens.next() {
        Some(Token::Uint(value)) => Ok(value),
        _ => Err(DropReason::UnsupportedMethod),
    }
}
