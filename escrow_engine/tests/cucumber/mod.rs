mod escrow_world;
mod steps;

pub use escrow_world::EscrowWorld;
