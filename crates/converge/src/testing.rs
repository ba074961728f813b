//! In-memory target used by the engine's own tests

use crate::context::{CancelToken, Context};
use crate::diff::{Changes, Differ};
use crate::error::{Error, Result};
use crate::field::{Field, TaskRef};
use crate::task::{Task, TaskKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Find(String),
    Render(String),
}

#[derive(Debug, Default)]
struct State {
    volumes: BTreeMap<String, (String, u32)>,
    steps: BTreeMap<String, Step>,
    events: Vec<Event>,
    fail_find: BTreeSet<String>,
    fail_render: BTreeSet<String>,
    panic_render: BTreeSet<String>,
    cancel_on: Option<(String, CancelToken)>,
    rendezvous: Option<(BTreeSet<String>, Arc<Rendezvous>)>,
}

/// Renders of the named steps wait here until all of them have arrived
#[derive(Debug, Default)]
struct Rendezvous {
    arrived: Mutex<usize>,
    all_here: Condvar,
}

impl Rendezvous {
    /// False when the others did not show up in time
    fn meet(&self, expected: usize) -> bool {
        let mut arrived = self.arrived.lock().unwrap();
        *arrived += 1;
        self.all_here.notify_all();
        let (_guard, wait) = self
            .all_here
            .wait_timeout_while(arrived, Duration::from_secs(5), |n| *n < expected)
            .unwrap();
        !wait.timed_out()
    }
}

/// Shared fake cloud; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    state: Arc<Mutex<State>>,
}

impl FakeCloud {
    pub fn context(&self) -> Context {
        Context::builder().target(self.clone()).build()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn renders(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Render(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn volume(&self, id: &str) -> Option<(String, u32)> {
        self.state.lock().unwrap().volumes.get(id).cloned()
    }

    pub fn insert_volume(&self, id: &str, name: &str, size_gb: u32) {
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert(id.to_string(), (name.to_string(), size_gb));
    }

    pub fn fail_find(&self, name: &str) {
        self.state.lock().unwrap().fail_find.insert(name.to_string());
    }

    pub fn fail_render(&self, name: &str) {
        self.state.lock().unwrap().fail_render.insert(name.to_string());
    }

    pub fn panic_render(&self, name: &str) {
        self.state.lock().unwrap().panic_render.insert(name.to_string());
    }

    /// Cancel `token` while rendering the step `name`
    pub fn cancel_on(&self, name: &str, token: &CancelToken) {
        self.state.lock().unwrap().cancel_on = Some((name.to_string(), token.clone()));
    }

    /// Block each named step's render until every one of them is rendering
    pub fn meet_in_render(&self, names: &[&str]) {
        let names = names.iter().map(ToString::to_string).collect();
        self.state.lock().unwrap().rendezvous = Some((names, Arc::default()));
    }

    fn record(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

fn cloud(ctx: &Context) -> Result<&FakeCloud> {
    ctx.target::<FakeCloud>()
        .ok_or_else(|| Error::lookup(anyhow::anyhow!("no fake cloud in context")))
}

/// A block volume with an immutable display name
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: String,
    pub name: Field<String>,
    pub size_gb: Field<u32>,
}

impl Volume {
    pub fn new(id: &str, name: &str, size_gb: u32) -> Self {
        Self {
            id: id.to_string(),
            name: Field::Set(name.to_string()),
            size_gb: Field::Set(size_gb),
        }
    }
}

impl Task for Volume {
    const KIND: &'static str = "Volume";

    fn name(&self) -> String {
        self.id.clone()
    }

    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
        Self {
            id: expected.id.clone(),
            name: differ.value("name", actual.map(|a| &a.name), &expected.name),
            size_gb: differ.value("size_gb", actual.map(|a| &a.size_gb), &expected.size_gb),
        }
    }

    fn find(&self, ctx: &Context) -> Result<Option<Self>> {
        let cloud = cloud(ctx)?;
        cloud.record(Event::Find(self.id.clone()));
        Ok(cloud.volume(&self.id).map(|(name, size_gb)| Self {
            id: self.id.clone(),
            name: Field::Set(name),
            size_gb: Field::Set(size_gb),
        }))
    }

    fn check_changes(
        actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        if actual.is_some() && changes.name.is_set() {
            return Err(Error::ImmutableField { field: "name" });
        }
        if actual.is_none() && expected.name.is_unset() {
            return Err(Error::RequiredField { field: "name" });
        }
        Ok(())
    }

    fn render(
        ctx: &Context,
        _actual: Option<&Self>,
        expected: &Self,
        changes: &Changes<Self>,
    ) -> Result<()> {
        let cloud = cloud(ctx)?;
        cloud.record(Event::Render(expected.id.clone()));
        let mut state = cloud.state.lock().unwrap();
        let entry = state
            .volumes
            .entry(expected.id.clone())
            .or_insert_with(|| (String::new(), 0));
        if let Some(name) = changes.name.get() {
            entry.0 = name.clone();
        }
        if let Some(size) = changes.size_gb.get() {
            entry.1 = *size;
        }
        Ok(())
    }
}

/// A generic unit of work, ordered through `after` references
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub value: Field<u32>,
    pub after: Field<Vec<TaskRef>>,
    pub requires: Vec<TaskKey>,
}

impl Step {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Field::Set(0),
            after: Field::Unset,
            requires: Vec::new(),
        }
    }

    pub fn value(mut self, value: u32) -> Self {
        self.value = Field::Set(value);
        self
    }

    pub fn after<const N: usize>(mut self, names: [&str; N]) -> Self {
        self.after = Field::Set(names.iter().map(|n| TaskRef::to::<Step>(*n)).collect());
        self
    }

    pub fn requires(mut self, key: TaskKey) -> Self {
        self.requires.push(key);
        self
    }
}

impl Task for Step {
    const KIND: &'static str = "Step";

    fn name(&self) -> String {
        self.name.clone()
    }

    fn dependencies(&self) -> Vec<TaskKey> {
        self.requires.clone()
    }

    fn diff(actual: Option<&Self>, expected: &Self, differ: &mut Differ) -> Self {
        Self {
            name: expected.name.clone(),
            value: differ.value("value", actual.map(|a| &a.value), &expected.value),
            after: differ.references("after", actual.map(|a| &a.after), &expected.after),
            requires: expected.requires.clone(),
        }
    }

    fn find(&self, ctx: &Context) -> Result<Option<Self>> {
        let cloud = cloud(ctx)?;
        cloud.record(Event::Find(self.name.clone()));
        let state = cloud.state.lock().unwrap();
        if state.fail_find.contains(&self.name) {
            return Err(Error::lookup(anyhow::anyhow!("{} is unreachable", self.name)));
        }
        Ok(state.steps.get(&self.name).cloned())
    }

    fn check_changes(
        _actual: Option<&Self>,
        _expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        Ok(())
    }

    fn render(
        ctx: &Context,
        _actual: Option<&Self>,
        expected: &Self,
        _changes: &Changes<Self>,
    ) -> Result<()> {
        let cloud = cloud(ctx)?;
        cloud.record(Event::Render(expected.name.clone()));
        let (fail, panic, cancel, rendezvous) = {
            let state = cloud.state.lock().unwrap();
            let cancel = state
                .cancel_on
                .as_ref()
                .filter(|(name, _)| name == &expected.name)
                .map(|(_, token)| token.clone());
            let rendezvous = state
                .rendezvous
                .as_ref()
                .filter(|(names, _)| names.contains(&expected.name))
                .map(|(names, meeting)| (names.len(), Arc::clone(meeting)));
            (
                state.fail_render.contains(&expected.name),
                state.panic_render.contains(&expected.name),
                cancel,
                rendezvous,
            )
        };
        if let Some(token) = cancel {
            token.cancel();
        }
        if let Some((expected_count, meeting)) = rendezvous
            && !meeting.meet(expected_count)
        {
            return Err(Error::render(anyhow::anyhow!("{} rendered alone", expected.name)));
        }
        if panic {
            panic!("step {} exploded", expected.name);
        }
        if fail {
            return Err(Error::render(anyhow::anyhow!("{} refused", expected.name)));
        }
        cloud
            .state
            .lock()
            .unwrap()
            .steps
            .insert(expected.name.clone(), expected.clone());
        Ok(())
    }
}
