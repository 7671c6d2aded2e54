//! Contract ABI bindings (spec §4.3, §6).
//!
//! Generated with `ethers::abigen!`, following the teacher's
//! `simulator::LstArbitrage` pattern but against a standard ERC-20 surface
//! and a PancakeSwap-V2-style router instead of a bespoke arb contract.
//! The router ABI is the subset original_source's `PANCAKE_ROUTER_ABI`
//! exposes to `DexSwapServiceAsync`.

use ethers::prelude::*;

abigen!(
    Erc20,
    r#"[
        function decimals() external view returns (uint8)
        function balanceOf(address account) external view returns (uint256)
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

abigen!(
    RouterV2,
    r#"[
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)
        function swapExactTokensForTokens(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts)
        function swapExactTokensForETH(uint256 amountIn, uint256 amountOutMin, address[] path, address to, uint256 deadline) external returns (uint256[] amounts)
        function swapExactETHForTokens(uint256 amountOutMin, address[] path, address to, uint256 deadline) external payable returns (uint256[] amounts)
    ]"#
);
