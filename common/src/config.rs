// 8 decimals numbers
pub const COIN_DECIMALS: u8 = 8;
// 100 000 000 dust to represent 1 ASI
pub const COIN_VALUE: u64 = 10u64.pow(COIN_DECIMALS as u32);

// Addresses format
// every ASI address starts with this literal prefix
pub const ADDRESS_PREFIX: &str = "1111";
// inclusive bounds on the address length, prefix included
pub const ADDRESS_MIN_LEN: usize = 53;
pub const ADDRESS_MAX_LEN: usize = 56;
// addresses and validator keys share columns capped at this width
pub const MAX_ADDRESS_LEN: usize = 150;

// Validator public keys are raw secp256k1 keys in hex
pub const VALIDATOR_KEY_HEX_LEN: usize = 130;

// Distinguished address holding all bonded stake at genesis
pub const POS_VAULT_ADDRESS: &str = "1111gW5kkGxHg7xDg6dRkZx2f7qxTizJzaCH9VEM1oJKWRvSX9Sk5";

// Source address for genesis mints, also the deployer of synthetic
// genesis allocation deployments
pub const GENESIS_SOURCE_ADDRESS: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// Default ports of the observer node consumed through the CLI
pub const DEFAULT_OBSERVER_GRPC_PORT: u16 = 40452;
pub const DEFAULT_OBSERVER_HTTP_PORT: u16 = 40453;
pub const DEFAULT_GRPC_PORT: u16 = 40412;
pub const DEFAULT_HTTP_PORT: u16 = 40413;

// Compile-time assertion, mirrors static_assert! from C++
#[macro_export]
macro_rules! static_assert {
    ($cond:expr, $msg:expr) => {
        const _: () = assert!($cond, $msg);
    };
}

// Static checks
static_assert!(
    ADDRESS_MIN_LEN <= ADDRESS_MAX_LEN,
    "Address min length must be less than or equal to max length"
);
static_assert!(
    ADDRESS_MAX_LEN <= MAX_ADDRESS_LEN,
    "Address max length must fit in the address column"
);
static_assert!(
    POS_VAULT_ADDRESS.len() >= ADDRESS_MIN_LEN && POS_VAULT_ADDRESS.len() <= ADDRESS_MAX_LEN,
    "PoS vault address must be a valid ASI address"
);
