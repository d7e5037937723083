mod helpers;
mod mocks;

mod escrows;
mod payments;
mod webhooks;
