use crate::token::Token;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Custom replacement for the default deep merge.
///
/// Receives the current state and the point's payload and returns the new state.
pub type Transform<S> = Arc<dyn Fn(&S, &Value) -> S + Send + Sync>;

/// A single proposed update to the context.
///
/// - no `token`: the current token stays as it is
/// - `payload` only: deep merged into the state, arrays replaced
/// - `payload` and `transform`: the transform computes the new state
///
/// When `token` names a registered action, the interpreter runs that action
/// with `args` instead of committing the point.
///
/// # Examples
///
/// ```
/// use ayatori::TransitionPoint;
/// use serde_json::json;
///
/// let point: TransitionPoint<serde_json::Value> = TransitionPoint::to("Loaded")
///     .with_payload(json!({ "items": [1, 2, 3] }));
///
/// assert_eq!(point.token.as_ref().map(|t| t.as_str()), Some("Loaded"));
/// assert!(point.transform.is_none());
/// ```
pub struct TransitionPoint<S> {
    /// Next state or next action
    pub token: Option<Token>,
    /// Arguments passed to the action named by `token`
    pub args: Vec<Value>,
    /// Partial state, as JSON
    pub payload: Option<Value>,
    /// Overrides the merge when a payload is present
    pub transform: Option<Transform<S>>,
}

impl<S> TransitionPoint<S> {
    /// A point that changes nothing.
    pub fn new() -> Self {
        Self {
            token: None,
            args: Vec::new(),
            payload: None,
            transform: None,
        }
    }

    /// A point moving to `token`.
    pub fn to(token: impl Into<Token>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::new()
        }
    }

    /// A point carrying only a payload.
    pub fn payload(payload: Value) -> Self {
        Self::new().with_payload(payload)
    }

    pub fn with_token(mut self, token: impl Into<Token>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.args = args.into_iter().collect();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the function that turns the current state and the payload into
    /// the next state.
    ///
    /// It runs while the context is write-locked. Use the state it is given;
    /// reading a captured [`SharedContext`](crate::SharedContext) from inside
    /// it deadlocks.
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&S, &Value) -> S + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }
}

impl<S> Default for TransitionPoint<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for TransitionPoint<S> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            args: self.args.clone(),
            payload: self.payload.clone(),
            transform: self.transform.clone(),
        }
    }
}

impl<S> fmt::Debug for TransitionPoint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionPoint")
            .field("token", &self.token)
            .field("args", &self.args)
            .field("payload", &self.payload)
            .field("transform", &self.transform.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
