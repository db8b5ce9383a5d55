//! Thinker kinds shared by the kernel's unit tests.

use crate::heap::Marker;
use crate::kind::Kind;
use crate::thinker::{Context, Thinker};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tickwork_common::{EntityId, StatNum};

/// Shared tick log. Each tick appends the ticking probe's name.
pub(crate) type Log = Rc<RefCell<Vec<String>>>;

pub(crate) fn log() -> Log {
    Rc::default()
}

pub(crate) fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

pub(crate) fn take(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}

/// Something a probe does from inside a hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Action {
    Spawn { name: String, stat: StatNum },
    /// Spawn, then immediately reclassify the newcomer.
    SpawnAndMove { name: String, stat: StatNum, to: i64 },
    Destroy(EntityId),
    DestroySelf,
    /// Spawn a copy of this probe that respawns again when destroyed.
    Respawn { stat: StatNum },
    ChangeStat { target: EntityId, stat: i64 },
    Step,
}

/// Scriptable thinker. `actions` run on its next tick and are then cleared.
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct Probe {
    pub name: String,
    #[serde(skip)]
    pub log: Log,
    pub actions: Vec<Action>,
    pub on_destroyed: Vec<Action>,
    pub ticks: u32,
    pub begun: u32,
    pub destroyed: u32,
    pub player: bool,
    /// Outcome of the last [`Action::Step`] attempt.
    #[serde(skip)]
    pub nested_step: Option<String>,
}

impl Probe {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn logged(name: &str, log: &Log) -> Self {
        Self {
            log: log.clone(),
            ..Self::named(name)
        }
    }

    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn when_destroyed(mut self, action: Action) -> Self {
        self.on_destroyed.push(action);
        self
    }

    pub fn player(mut self) -> Self {
        self.player = true;
        self
    }

    fn run(&mut self, actions: Vec<Action>, cx: &mut Context<'_>) {
        for action in actions {
            match action {
                Action::Spawn { name, stat } => {
                    cx.spawn(Probe::logged(&name, &self.log), stat);
                }
                Action::SpawnAndMove { name, stat, to } => {
                    let spawned = cx.spawn(Probe::logged(&name, &self.log), stat);
                    cx.change_stat_num(spawned, to);
                }
                Action::Destroy(id) => {
                    if let Some(target) = cx.heap.find(id) {
                        let _ = cx.destroy(target);
                    }
                }
                Action::Respawn { stat } => {
                    let heir = Probe::logged(&self.name, &self.log)
                        .when_destroyed(Action::Respawn { stat });
                    cx.spawn(heir, stat);
                }
                Action::DestroySelf => {
                    let _ = cx.destroy_self();
                }
                Action::ChangeStat { target, stat } => {
                    if let Some(target) = cx.heap.find(target) {
                        cx.change_stat_num(target, stat);
                    }
                }
                Action::Step => {
                    let outcome = cx.world.run_step(cx.heap);
                    self.nested_step = Some(match outcome {
                        Ok(_) => "ran".to_string(),
                        Err(err) => err.to_string(),
                    });
                }
            }
        }
    }
}

impl Thinker for Probe {
    fn tick(&mut self, cx: &mut Context<'_>) {
        self.ticks += 1;
        self.log.borrow_mut().push(self.name.clone());
        let actions = std::mem::take(&mut self.actions);
        self.run(actions, cx);
    }

    fn post_begin_play(&mut self, _cx: &mut Context<'_>) {
        self.begun += 1;
    }

    fn on_destroy(&mut self, cx: &mut Context<'_>) {
        self.destroyed += 1;
        let actions = std::mem::take(&mut self.on_destroyed);
        self.run(actions, cx);
    }

    fn is_player(&self) -> bool {
        self.player
    }
}

impl Kind for Probe {
    const NAME: &'static str = "Probe";
}

/// Keeps another entity alive through the collector without linking it.
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct Anchor {
    pub held: Option<EntityId>,
}

impl Anchor {
    pub fn holding(id: EntityId) -> Self {
        Self { held: Some(id) }
    }
}

impl Thinker for Anchor {
    fn propagate_mark(&self, marker: &mut Marker<'_>) {
        if let Some(id) = self.held {
            marker.mark_id(id);
        }
    }
}

impl Kind for Anchor {
    const NAME: &'static str = "Anchor";
}

#[derive(Default, Serialize, Deserialize)]
pub(crate) struct Missile {
    pub speed: f32,
    pub ticks: u32,
}

impl Thinker for Missile {
    fn tick(&mut self, _cx: &mut Context<'_>) {
        self.ticks += 1;
    }
}

impl Kind for Missile {
    const NAME: &'static str = "Missile";
    const PARENT: Option<&'static str> = Some("Actor");
}

/// Passive by default; counts ticks it should never receive.
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct Lamp {
    pub ticks: u32,
}

impl Thinker for Lamp {
    fn tick(&mut self, _cx: &mut Context<'_>) {
        self.ticks += 1;
    }
}

impl Kind for Lamp {
    const NAME: &'static str = "Lamp";
    const DEFAULT_STAT: StatNum = StatNum::PASSIVE;
}
