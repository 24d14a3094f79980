//! SeaORM entities mapping the monitor tables.
//!
//! Each entity lives in its own module; the `prelude` re-exports the
//! entity/model/column types under stable aliases.

pub mod monitor;
pub mod monitor_check_in;
pub mod monitor_environment;
pub mod project;

pub mod prelude {
    pub use super::project::Entity as Project;
    pub use super::project::Model as ProjectModel;
    pub use super::project::ActiveModel as ProjectActiveModel;
    pub use super::project::Column as ProjectColumn;

    pub use super::monitor::Entity as Monitor;
    pub use super::monitor::Model as MonitorModel;
    pub use super::monitor::ActiveModel as MonitorActiveModel;
    pub use super::monitor::Column as MonitorColumn;

    pub use super::monitor_environment::Entity as MonitorEnvironment;
    pub use super::monitor_environment::Model as MonitorEnvironmentModel;
    pub use super::monitor_environment::ActiveModel as MonitorEnvironmentActiveModel;
    pub use super::monitor_environment::Column as MonitorEnvironmentColumn;

    pub use super::monitor_check_in::Entity as MonitorCheckIn;
    pub use super::monitor_check_in::Model as MonitorCheckInModel;
    pub use super::monitor_check_in::ActiveModel as MonitorCheckInActiveModel;
    pub use super::monitor_check_in::Column as MonitorCheckInColumn;
}
