mod client;
pub use client::ForumClient;

mod collection;
pub use collection::{Collection, CollectionState};

mod dual_write;
pub use dual_write::{plan_creation, plan_deletion, DualWriteCoordinator};

mod engine;
pub use engine::{MergeReport, ReconciliationEngine};

mod guard;
pub use guard::{Classification, DuplicateGuard};

mod mutator;
pub use mutator::{OptimisticMutator, StagedCreate, StagedLike};

mod normalize;
pub use normalize::{normalize, to_record};

mod pending;
pub use pending::{MutationKind, MutationToken, Payload, PendingLedger, PendingMutation};

mod session;
pub use session::{Session, SessionContext};

mod subscription;
pub use subscription::{SubscriptionHandle, SubscriptionManager};

pub mod api {
    pub use agora_api::*;
}
