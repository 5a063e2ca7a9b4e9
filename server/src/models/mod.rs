pub mod event;
pub mod ids;
pub mod notification;
pub mod user;

pub use event::{Category, Event, EventStatus, GeoPoint, MyEvents, NewEvent};
pub use ids::{EventId, NotificationId, UserId};
pub use notification::{Frame, FrameError, Notification, NotificationKind};
pub use user::{NewUser, StatsDelta, User, UserSummary};
