//! Handler system for the Linbot framework.
//!
//! Handlers are plain async functions whose parameters implement
//! [`FromInvocation`]. The [`Handler`] trait is implemented for functions of
//! every arity up to 16, Axum-style, and records the slot of each parameter
//! so the dispatcher can check eligibility without calling anything.
//!
//! # Example
//!
//! ```rust,ignore
//! use linbot_framework::{CommandArgs, EventContext};
//! use linbot_core::GroupMessageEvent;
//!
//! // No parameters: eligible for every event.
//! async fn ping() {}
//!
//! // Only runs for group messages.
//! async fn echo(event: EventContext<GroupMessageEvent>, args: CommandArgs) {
//!     println!("{} said {}", event.user_id, args);
//! }
//!
//! // Errors are logged by the dispatcher.
//! async fn fallible() -> anyhow::Result<()> {
//!     Ok(())
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{HandlerError, HandlerResult};
use crate::extractor::{FromInvocation, Invocation, Slot};

/// A type alias for a boxed, pinned future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ============================================================================
// Return values
// ============================================================================

/// Handler return types.
pub trait IntoHandlerResult {
    fn into_handler_result(self) -> HandlerResult;
}

impl IntoHandlerResult for () {
    fn into_handler_result(self) -> HandlerResult {
        Ok(())
    }
}

impl<E: Display> IntoHandlerResult for Result<(), E> {
    fn into_handler_result(self) -> HandlerResult {
        self.map_err(|e| HandlerError::Failed(e.to_string()))
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for event handlers.
///
/// # Blanket Implementation
///
/// Implemented for async functions that:
/// - take 0-16 parameters implementing [`FromInvocation`]
/// - return `()` or `Result<(), E>` with `E: Display`
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// The type of future calling this handler returns.
    type Future: Future<Output = HandlerResult> + Send + 'static;

    /// Builds the arguments and calls the handler.
    fn call(self, inv: Invocation) -> Self::Future;

    /// One slot per parameter, in declaration order.
    fn slots() -> Vec<Slot>;
}

// ============================================================================
// Type erasure
// ============================================================================

/// A wrapper that stores a handler function with its slot table.
pub struct HandlerFn<F, T> {
    f: F,
    slots: Vec<Slot>,
    _marker: PhantomData<fn() -> T>,
}

impl<F, T> HandlerFn<F, T>
where
    F: Handler<T>,
{
    /// Creates a new handler function wrapper.
    pub fn new(f: F) -> Self {
        Self {
            f,
            slots: F::slots(),
            _marker: PhantomData,
        }
    }
}

impl<F: Clone, T> Clone for HandlerFn<F, T> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            slots: self.slots.clone(),
            _marker: PhantomData,
        }
    }
}

/// A type-erased handler that can be stored in collections.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Type-erased handler trait for dynamic dispatch.
pub trait ErasedHandler: Send + Sync {
    /// Execute the handler.
    fn call(&self, inv: Invocation) -> BoxFuture<'static, HandlerResult>;

    /// The handler's slot table.
    fn slots(&self) -> &[Slot];

    /// The function's own name, used when a registration gives none.
    ///
    /// `None` for closures, which have no name of their own.
    fn default_name(&self) -> Option<&'static str>;
}

impl<F, T> ErasedHandler for HandlerFn<F, T>
where
    F: Handler<T>,
    T: 'static,
{
    fn call(&self, inv: Invocation) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self.f.clone().call(inv))
    }

    fn slots(&self) -> &[Slot] {
        &self.slots
    }

    fn default_name(&self) -> Option<&'static str> {
        short_type_name::<F>()
    }
}

/// Convert a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(HandlerFn::new(f))
}

/// Last path segment of a type name: `my_bot::plugins::echo` → `echo`.
///
/// Closures (`...::{{closure}}`) yield `None`.
fn short_type_name<T>() -> Option<&'static str> {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    let name = match path.rfind("::") {
        Some(idx) => &path[idx + 2..],
        None => path,
    };
    (!name.is_empty() && !name.starts_with('{')).then_some(name)
}

// ============================================================================
// Handler implementations for functions (Axum-style)
// ============================================================================

impl<F, Fut, Out> Handler<()> for F
where
    F: FnOnce() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Out> + Send + 'static,
    Out: IntoHandlerResult,
{
    type Future = BoxFuture<'static, HandlerResult>;

    fn call(self, _inv: Invocation) -> Self::Future {
        Box::pin(async move { (self)().await.into_handler_result() })
    }

    fn slots() -> Vec<Slot> {
        Vec::new()
    }
}

/// Macro to generate Handler implementations for functions with different arities.
macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        impl<F, Fut, Out, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Out> + Send + 'static,
            Out: IntoHandlerResult,
            $( $ty: FromInvocation + Send + 'static, )*
        {
            type Future = BoxFuture<'static, HandlerResult>;

            fn call(self, inv: Invocation) -> Self::Future {
                Box::pin(async move {
                    $(
                        let $ty = $ty::from_invocation(&inv)?;
                    )*

                    (self)($($ty,)*).await.into_handler_result()
                })
            }

            fn slots() -> Vec<Slot> {
                vec![$($ty::SLOT,)*]
            }
        }
    };
}

impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15
);
impl_handler!(
    T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15, T16
);

#[cfg(test)]
mod tests {
    use linbot_core::{Event, EventType, GroupMessageEvent};
    use serde_json::json;

    use super::*;
    use crate::error::ExtractError;
    use crate::extractor::{CommandArgs, EventContext};

    async fn plain() {}

    async fn typed(_event: EventContext<GroupMessageEvent>, _args: CommandArgs) {}

    async fn failing() -> Result<(), String> {
        Err("boom".into())
    }

    fn invocation() -> Invocation {
        let event = Event::from_value(json!({
            "post_type": "message", "message_type": "private", "user_id": 1
        }))
        .unwrap();
        Invocation::new(Arc::new(event))
    }

    #[test]
    fn test_slot_table_follows_signature() {
        assert!(into_handler(plain).slots().is_empty());
        assert_eq!(
            into_handler(typed).slots(),
            &[Slot::Event(EventType::GroupMessage), Slot::CommandArgs]
        );
    }

    #[test]
    fn test_default_name_is_function_name() {
        assert_eq!(into_handler(plain).default_name(), Some("plain"));
        assert_eq!(into_handler(typed).default_name(), Some("typed"));
        assert_eq!(into_handler(|| async {}).default_name(), None);
    }

    #[tokio::test]
    async fn test_outcomes() {
        assert!(into_handler(plain).call(invocation()).await.is_ok());

        let err = into_handler(failing).call(invocation()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Failed(ref m) if m == "boom"));

        let err = into_handler(typed).call(invocation()).await.unwrap_err();
        assert!(matches!(
            err,
            HandlerError::Extract(ExtractError::EventTypeMismatch { .. })
        ));
    }
}
