//! Motorized covers (roller shades, curtains).

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use xgate_devices::{AttrMap, AttrValue, Platform};

use crate::adapter::{listen, put, EntityAdapter, StateChange};
use crate::entity::Entity;
use crate::error::Result;

pub const POSITION: &str = "position";
pub const RUN_STATE: &str = "run_state";

/// Positions at or below this count as closed; some motors stop a little
/// short of zero.
const CLOSED_POSITION: i64 = 2;

#[derive(Debug)]
pub struct Cover {
    attr: String,
    listen: BTreeSet<String>,
    position: Option<i64>,
    run_state: Option<String>,
}

impl Cover {
    /// Cover driven through the motor attribute `attr`.
    pub fn new(attr: &str) -> Self {
        Self {
            attr: attr.to_string(),
            listen: listen([POSITION, RUN_STATE]),
            position: None,
            run_state: None,
        }
    }

    pub fn position(&self) -> Option<i64> {
        self.position
    }

    pub fn is_closed(&self) -> Option<bool> {
        self.position.map(|p| p <= CLOSED_POSITION)
    }

    pub fn is_opening(&self) -> bool {
        self.run_state.as_deref() == Some("opening")
    }

    pub fn is_closing(&self) -> bool {
        self.run_state.as_deref() == Some("closing")
    }

    fn motor(&self, command: &str) -> AttrMap {
        AttrMap::from([(self.attr.clone(), AttrValue::from(command))])
    }
}

impl EntityAdapter for Cover {
    fn platform(&self) -> Platform {
        Platform::Cover
    }

    fn attr(&self) -> &str {
        &self.attr
    }

    fn listen_attrs(&self) -> &BTreeSet<String> {
        &self.listen
    }

    fn set_state(&mut self, data: &AttrMap) -> StateChange {
        if let Some(position) = data.get(POSITION).and_then(AttrValue::as_i64) {
            self.position = Some(position);
        }
        if let Some(run_state) = data.get(RUN_STATE).and_then(AttrValue::as_str) {
            self.run_state = Some(run_state.to_string());
        }
        StateChange::none()
    }

    fn get_state(&self) -> AttrMap {
        AttrMap::from([
            (POSITION.to_string(), self.position.map_or(AttrValue::Null, AttrValue::from)),
            (
                RUN_STATE.to_string(),
                self.run_state.clone().map_or(AttrValue::Null, AttrValue::from),
            ),
        ])
    }

    fn state(&self) -> String {
        let state = if self.is_opening() {
            "opening"
        } else if self.is_closing() {
            "closing"
        } else {
            match self.is_closed() {
                Some(true) => "closed",
                Some(false) => "open",
                None => "unknown",
            }
        };
        state.to_string()
    }

    fn attributes(&self) -> Map<String, Value> {
        let mut map = Map::new();
        put(&mut map, "current_position", self.position);
        map
    }
}

impl Entity<Cover> {
    pub async fn open(&self) -> Result<()> {
        self.write(self.inspect(|c| c.motor("open"))).await
    }

    pub async fn close(&self) -> Result<()> {
        self.write(self.inspect(|c| c.motor("close"))).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.write(self.inspect(|c| c.motor("stop"))).await
    }

    pub async fn set_position(&self, position: i64) -> Result<()> {
        self.write(AttrMap::from([(POSITION.to_string(), AttrValue::Integer(position))]))
            .await
    }
}
