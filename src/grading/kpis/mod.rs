pub mod acceleration_bounds;
pub mod collision;
pub mod collision_passive;
pub mod compliance;
pub mod follow_start_jerk;
pub mod manual_takeover;
pub mod max_speed;
pub mod overspeed_duration;
pub mod parking_precision;
pub mod snake_driving;

pub use acceleration_bounds::AccelerationBounds;
pub use collision::{find_contact, Collision, CollisionKind, Contact};
pub use collision_passive::{CollisionPassive, PassiveKind};
pub use compliance::{Compliance, ComplianceScore, SpeedingGrade, SpeedingMonitor, ViolationKind};
pub use follow_start_jerk::FollowStartJerk;
pub use manual_takeover::{ChassisSignals, ManualTakeover};
pub use max_speed::MaxSpeed;
pub use overspeed_duration::OverSpeedDuration;
pub use parking_precision::{ParkingMeasurement, ParkingPrecision, ParkingSpace, ParkingSpaces, ParkingStage, ParkingState};
pub use snake_driving::SnakeDriving;
