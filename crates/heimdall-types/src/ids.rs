//! Opaque 128-bit entity identifiers.
//!
//! Every entity id is a distinct newtype over `Uuid` so that, for
//! example, a `ChildId` can never be passed where a `DeviceId` is
//! expected even though both are UUIDs underneath.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

id_type!(FamilyId);
id_type!(UserId);
id_type!(DeviceId);
id_type!(DeviceCouplingId);
id_type!(AppGroupId);
id_type!(AppGroupAppId);
id_type!(TimeRuleId);
id_type!(DayTypeOverrideId);
id_type!(TanId);
id_type!(TanScheduleId);
id_type!(TanScheduleLogId);
id_type!(QuestTemplateId);
id_type!(QuestInstanceId);
id_type!(UsageEventId);
id_type!(UsageRewardRuleId);
id_type!(UsageRewardLogId);
id_type!(FamilyInvitationId);
id_type!(RefreshTokenId);

/// `UserId` scoped to a user with `role = child`. Carried as a distinct
/// alias at call sites that only make sense for children (quest
/// assignment, TAN redemption) even though it is not a separate table.
pub type ChildId = UserId;
