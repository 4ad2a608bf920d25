//! Deterministic state-machine core of the Kestrel proof-of-stake network.
//!
//! The crate hosts the two consensus-critical subsystems: the staking
//! `ledger` (share-based escrow accounting with a debonding queue and
//! per-account stake claims) and the committee `scheduler` (per-epoch,
//! beacon-driven election of the validator set and per-runtime worker
//! committees). Both run inside the [`app::Mux`], which the consensus engine
//! drives through `begin_block`/`deliver_tx`/`end_block`/`commit`.
//!
//! Everything on that path is required to be bit-identical across replicas:
//! state lives behind the [`state`] adapters over a versioned key-value
//! tree, randomness comes exclusively from the [`drbg`] stream seeded by the
//! epoch beacon, and all amounts use the arbitrary-precision
//! [`quantity::Quantity`]. Out-of-band consumers subscribe through
//! [`events::EventBus`] and query committed snapshots only.

pub mod address;
pub mod app;
pub mod commission;
pub mod crypto;
pub mod drbg;
pub mod epochtime;
pub mod errors;
pub mod events;
pub mod genesis;
pub mod quantity;
pub mod state;
pub mod timer;
pub mod types;

pub use address::Address;
pub use app::{BlockInputs, Mux, ValidatorUpdate};
pub use errors::{CoreError, CoreResult};
pub use genesis::Genesis;
pub use quantity::Quantity;
