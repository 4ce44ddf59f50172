//! Reusable entry points around step procedures.
//!
//! [`Wrapped`] turns a step procedure factory into something callable many
//! times, each call starting a fresh computation. [`Registry`] is the
//! explicit way to expose a set of named procedures sharing one loop.

use crate::coroutine::{Invocation, Options, start};
use crate::error::RegistryError;
use crate::outcome::{Callback, Outcome};
use crate::runtime::Schedule;
use crate::step::Step;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

type Factory<C, S> =
    dyn Fn(Invocation<C, <S as Step>::Value, <S as Step>::Error, <S as Step>::Output>) -> S;

/// A step procedure bound to a loop and a set of options.
pub struct Wrapped<H, C, S: Step> {
    schedule: H,
    options: Options<C>,
    factory: Rc<Factory<C, S>>,
}

impl<H, C, S> Wrapped<H, C, S>
where
    H: Schedule + Clone + 'static,
    C: Clone + 'static,
    S: Step,
{
    /// Starts a new computation with `args`. Returns its [`Outcome`] unless
    /// `callback` takes the result.
    pub fn call(
        &self,
        args: Vec<S::Value>,
        callback: Option<Callback<S::Output, S::Error>>,
    ) -> Option<Outcome<S::Output, S::Error>> {
        let factory = self.factory.clone();
        start(
            &self.schedule,
            move |invocation| factory(invocation),
            args,
            self.options.clone(),
            callback,
        )
    }

    pub fn options(&self) -> &Options<C> {
        &self.options
    }
}

impl<H: Clone, C: Clone, S: Step> Clone for Wrapped<H, C, S> {
    fn clone(&self) -> Self {
        Self {
            schedule: self.schedule.clone(),
            options: self.options.clone(),
            factory: self.factory.clone(),
        }
    }
}

impl<H, C: fmt::Debug, S: Step> fmt::Debug for Wrapped<H, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

pub fn wrap<H, C, S, F>(schedule: &H, options: Options<C>, factory: F) -> Wrapped<H, C, S>
where
    H: Schedule + Clone + 'static,
    C: Clone + 'static,
    S: Step,
    F: Fn(Invocation<C, S::Value, S::Error, S::Output>) -> S + 'static,
{
    Wrapped {
        schedule: schedule.clone(),
        options,
        factory: Rc::new(factory),
    }
}

type Entry<V, T, E> = Rc<dyn Fn(Vec<V>, Option<Callback<T, E>>) -> Option<Outcome<T, E>>>;

/// Named step procedures sharing a value, output and error type.
///
/// ```
/// use tedio_coro::{EventLoop, Fault, Invocation, Registry, Resume, Yield, from_fn};
///
/// #[derive(Debug)]
/// struct Oops;
/// impl From<Fault> for Oops {
///     fn from(_: Fault) -> Self {
///         Oops
///     }
/// }
///
/// let event_loop = EventLoop::new();
/// let registry = Registry::new(event_loop.handle()).register(
///     "add",
///     |inv: Invocation<(), i64, Oops, i64>| {
///         let sum: i64 = inv.values().sum();
///         from_fn(move |_: Resume<i64, Oops>, _next| Ok(Yield::Complete(sum)))
///     },
/// );
///
/// let outcome = registry.call("add", vec![100, 23], None).unwrap().unwrap();
/// assert_eq!(event_loop.block_on(outcome).unwrap(), 123);
/// ```
pub struct Registry<H, V, T, E> {
    schedule: H,
    entries: BTreeMap<String, Entry<V, T, E>>,
}

impl<H, V, T, E> Registry<H, V, T, E>
where
    H: Schedule + Clone + 'static,
    V: 'static,
    T: 'static,
    E: 'static,
{
    pub fn new(schedule: H) -> Self {
        Self {
            schedule,
            entries: BTreeMap::new(),
        }
    }

    pub fn register<S, F>(self, name: impl Into<String>, factory: F) -> Self
    where
        S: Step<Value = V, Output = T, Error = E>,
        F: Fn(Invocation<(), V, E, T>) -> S + 'static,
    {
        self.register_with(name, Options::new(), factory)
    }

    pub fn register_with<C, S, F>(
        mut self,
        name: impl Into<String>,
        options: Options<C>,
        factory: F,
    ) -> Self
    where
        C: Clone + 'static,
        S: Step<Value = V, Output = T, Error = E>,
        F: Fn(Invocation<C, V, E, T>) -> S + 'static,
    {
        let name = name.into();
        let wrapped = wrap(&self.schedule, options, factory);
        tracing::debug!(%name, "registered step procedure");
        let entry = move |args: Vec<V>, callback: Option<Callback<T, E>>| {
            wrapped.call(args, callback)
        };
        self.entries.insert(name, Rc::new(entry));
        self
    }

    pub fn call(
        &self,
        name: &str,
        args: Vec<V>,
        callback: Option<Callback<T, E>>,
    ) -> Result<Option<Outcome<T, E>>, RegistryError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))?;
        Ok(entry(args, callback))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<H, V, T, E> fmt::Debug for Registry<H, V, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
