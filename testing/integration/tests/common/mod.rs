use std::sync::Once;

use erc20_ledger::{MemoryLedger, TokenConfig};
use fvm_shared::address::{Address, BLS_PUB_LEN};
use ledger_utils::LedgerRuntime;
use tracing_subscriber::EnvFilter;

/// Genesis config of the token the scenarios run against: 10^27 base units held by f010
pub const TOPCODER_COIN: &str = r#"{
    "name": "Topcoder Coin",
    "symbol": "TCC",
    "decimals": 18,
    "initial_supply": "1000000000000000000000000000",
    "owner": "f010"
}"#;

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary, filtered by RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Creates an in-memory ledger from the given genesis config
pub fn construct_ledger(config: &str) -> MemoryLedger {
    init_tracing();
    let config = TokenConfig::from_json(config).unwrap();
    MemoryLedger::genesis(LedgerRuntime::new_memory_runtime(), &config).unwrap()
}

/// Returns a distinct secp256k1 address for each seed
#[allow(dead_code)]
pub fn secp_address(seed: u8) -> Address {
    let key = vec![seed; 65];
    Address::new_secp256k1(key.as_slice()).unwrap()
}

/// Returns a distinct BLS address for each seed
#[allow(dead_code)]
pub fn bls_address(seed: u8) -> Address {
    let key = vec![seed; BLS_PUB_LEN];
    Address::new_bls(key.as_slice()).unwrap()
}
