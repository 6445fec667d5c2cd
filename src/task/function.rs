//! Function tasks
//!
//! Every function task is stored as one shape: a closure taking a
//! [`TaskContext`] and returning a boxed local future. The constructors
//! below adapt the other authoring styles (plain closures, streams and
//! callback-style completion) to that shape.

use crate::error::{TaskError, TaskResult};
use crate::runner::TaskContext;
use crate::task::spec::TaskSpec;
use crate::task::value::TaskValue;
use futures::future::LocalBoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use tokio::sync::oneshot;

/// A task a function asks to run after it completes
pub type FollowOn = Option<TaskValue>;

/// Future produced by a task function
pub type TaskFuture = LocalBoxFuture<'static, TaskResult<FollowOn>>;

/// Values a task function may return.
///
/// Anything that is not a task value is ignored.
pub trait IntoFollowOn {
    fn into_follow_on(self) -> FollowOn;
}

impl IntoFollowOn for () {
    fn into_follow_on(self) -> FollowOn {
        None
    }
}

/// Plain values a function may return; they queue nothing
macro_rules! impl_no_follow_on {
    ($($ty:ty),*) => {
        $(
            impl IntoFollowOn for $ty {
                fn into_follow_on(self) -> FollowOn {
                    None
                }
            }
        )*
    };
}

impl_no_follow_on!(bool, i32, i64, u32, u64, usize, f32, f64);

impl IntoFollowOn for TaskValue {
    fn into_follow_on(self) -> FollowOn {
        Some(self)
    }
}

impl IntoFollowOn for Option<TaskValue> {
    fn into_follow_on(self) -> FollowOn {
        self
    }
}

impl IntoFollowOn for &str {
    fn into_follow_on(self) -> FollowOn {
        Some(TaskValue::from(self))
    }
}

impl IntoFollowOn for String {
    fn into_follow_on(self) -> FollowOn {
        Some(TaskValue::from(self))
    }
}

impl<T: Into<TaskValue>> IntoFollowOn for Vec<T> {
    fn into_follow_on(self) -> FollowOn {
        Some(TaskValue::from(self))
    }
}

impl IntoFollowOn for TaskFn {
    fn into_follow_on(self) -> FollowOn {
        Some(TaskValue::Function(self))
    }
}

impl IntoFollowOn for TaskSpec {
    fn into_follow_on(self) -> FollowOn {
        Some(TaskValue::Spec(self))
    }
}

/// A shareable task function
#[derive(Clone)]
pub struct TaskFn(Rc<dyn Fn(TaskContext) -> TaskFuture>);

impl TaskFn {
    /// Wrap an async function
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + 'static,
        Fut: Future<Output = TaskResult<R>> + 'static,
        R: IntoFollowOn,
    {
        TaskFn(Rc::new(move |ctx| {
            let fut = f(ctx);
            async move { fut.await.map(IntoFollowOn::into_follow_on) }.boxed_local()
        }))
    }

    /// Wrap a function that completes synchronously
    pub fn sync<F, R>(f: F) -> Self
    where
        F: Fn(&TaskContext) -> TaskResult<R> + 'static,
        R: IntoFollowOn,
    {
        TaskFn(Rc::new(move |ctx| {
            let result = f(&ctx).map(IntoFollowOn::into_follow_on);
            futures::future::ready(result).boxed_local()
        }))
    }

    /// Wrap a function returning a stream; the task completes when the
    /// stream ends and fails on the first error item.
    pub fn stream<F, S, T, E>(f: F) -> Self
    where
        F: Fn(TaskContext) -> S + 'static,
        S: Stream<Item = Result<T, E>> + 'static,
        E: fmt::Display,
    {
        TaskFn(Rc::new(move |ctx| {
            let stream = f(ctx);
            async move {
                let mut stream = Box::pin(stream);
                while let Some(item) = stream.next().await {
                    if let Err(e) = item {
                        return Err(TaskError::Stream(e.to_string()));
                    }
                }
                Ok(None)
            }
            .boxed_local()
        }))
    }

    /// Wrap a function that signals completion through a [`Done`] handle
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(TaskContext, Done) + 'static,
    {
        TaskFn(Rc::new(move |ctx| {
            let (tx, rx) = oneshot::channel();
            f(ctx, Done(tx));
            async move {
                rx.await.unwrap_or_else(|_| {
                    Err(TaskError::msg("task callback dropped without completing"))
                })
            }
            .boxed_local()
        }))
    }

    pub fn call(&self, ctx: TaskContext) -> TaskFuture {
        (self.0)(ctx)
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFn")
    }
}

/// Completion handle for callback-style functions
pub struct Done(oneshot::Sender<TaskResult<FollowOn>>);

impl Done {
    pub fn ok(self) {
        self.finish(Ok(None));
    }

    /// Complete and run `value` next
    pub fn then(self, value: impl Into<TaskValue>) {
        self.finish(Ok(Some(value.into())));
    }

    pub fn fail(self, error: TaskError) {
        self.finish(Err(error));
    }

    pub fn finish(self, result: TaskResult<FollowOn>) {
        // The receiver only goes away when the run was cancelled.
        let _ = self.0.send(result);
    }
}
