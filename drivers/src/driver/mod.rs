//! Building blocks shared by every driver object.
//!
//! - [`event`]: callback registration and delivery
//! - [`transfer`]: per-direction transfer descriptors and blocking waits
//!
//! Driver objects are `static`s created with [`declare_driver!`], which also
//! generates the `extern "C"` entry point the vector table points at.

pub mod event;
pub mod transfer;

pub use event::{DispatchMode, EventCallback, EventDispatcher, Mailbox};
pub use transfer::{FrameFormat, Received, RxTransfer, TxTransfer, wait_for};

/// Declare a driver object `static` together with its interrupt entry point.
///
/// The type's `new` receives the listed arguments followed by the entry
/// point, which forwards to the object's `on_interrupt`.
///
/// ```ignore
/// declare_driver! {
///     pub static USART: UsartDriver<SimPlatform, SimUsart> =
///         (&board::USARTS, [SimUsart::new(), SimUsart::new(), SimUsart::new()]);
/// }
/// ```
#[macro_export]
macro_rules! declare_driver {
    ($(#[$meta:meta])* $vis:vis static $name:ident: $ty:ty = ($($arg:expr),* $(,)?);) => {
        $(#[$meta])*
        $vis static $name: $ty = {
            extern "C" fn entry() {
                $name.on_interrupt();
            }
            <$ty>::new($($arg,)* entry)
        };
    };
}
