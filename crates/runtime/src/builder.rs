//! Environment assembly
//!
//! The code-generation boundary: a generated (or hand-written) binding
//! describes its reactors, ports, timers, actions, reactions, and
//! connections through this builder, and `build()` turns the description
//! into a validated [Environment]. All build-time errors — dependency
//! cycles, mixed-radix overflow, malformed connections, duplicate names —
//! are reported here, before any tag executes.

use std::collections::HashSet;
use std::time::Duration;

use tracing::info;

use crate::addr::MixedRadixInt;
use crate::env::{ActionDecl, Environment, ReactorInstance, TimerDecl};
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, ReactionDecl};
use crate::port::{PortDecl, PortFabric, PortSide};
use crate::scheduler::ReactionFn;
use crate::types::{
    ActionKey, EffectKey, PortKey, ReactionKey, ReactorKey, TimerKey, TriggerKey,
};

#[derive(Debug, Clone)]
struct ConnectionDecl {
    source: PortKey,
    dest: PortKey,
    delay: Option<Duration>,
}

/// Builder for one environment.
#[derive(Default)]
pub struct EnvBuilder {
    reactors: Vec<ReactorInstance>,
    /// Names declared inside each reactor (ports, timers, actions, reactions).
    member_names: Vec<HashSet<String>>,
    ports: Vec<PortDecl>,
    timers: Vec<TimerDecl>,
    actions: Vec<ActionDecl>,
    reactions: Vec<ReactionDecl>,
    bodies: Vec<ReactionFn>,
    connections: Vec<ConnectionDecl>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        EnvBuilder::default()
    }

    /// Add a single (width-1 bank) reactor instance.
    pub fn add_reactor(&mut self, name: &str, parent: Option<ReactorKey>) -> Result<ReactorKey> {
        let mut keys = self.add_bank(name, parent, 1)?;
        Ok(keys.remove(0))
    }

    /// Add a bank of `width` replicated reactor instances. Instance `i` is
    /// named `name[i]` under the parent's path (plain `name` for a
    /// width-1 bank) and carries the bank digit `i` below its parent's
    /// digits.
    pub fn add_bank(
        &mut self,
        name: &str,
        parent: Option<ReactorKey>,
        width: u32,
    ) -> Result<Vec<ReactorKey>> {
        if width == 0 {
            return Err(Error::InvalidDeclaration {
                item: name.to_string(),
                reason: "bank width is zero".to_string(),
            });
        }
        if let Some(parent) = parent {
            self.check_reactor(parent)?;
        }
        self.check_sibling_name(name, parent)?;

        let (prefix, parent_digits, parent_radices) = match parent {
            Some(p) => {
                let parent = &self.reactors[p.index()];
                (
                    format!("{}.", parent.name),
                    parent.bank.digits().to_vec(),
                    parent.bank.radices().to_vec(),
                )
            }
            None => (String::new(), Vec::new(), Vec::new()),
        };

        let mut keys = Vec::with_capacity(width as usize);
        for i in 0..width {
            let key = ReactorKey(self.reactors.len() as u32);
            let instance_name = if width == 1 {
                format!("{prefix}{name}")
            } else {
                format!("{prefix}{name}[{i}]")
            };

            let mut digits = vec![i];
            digits.extend_from_slice(&parent_digits);
            let mut radices = vec![width];
            radices.extend_from_slice(&parent_radices);
            let bank = MixedRadixInt::new(digits, radices)?;
            // Surface address-width overflow at build time
            bank.flatten()?;

            self.reactors
                .push(ReactorInstance::new(key, instance_name, parent, bank));
            self.member_names.push(HashSet::new());
            keys.push(key);
        }
        Ok(keys)
    }

    /// Attach initial state to a reactor instance.
    pub fn set_state<T: Send + 'static>(&mut self, reactor: ReactorKey, state: T) -> Result<()> {
        self.check_reactor(reactor)?;
        self.reactors[reactor.index()].set_state(Box::new(state));
        Ok(())
    }

    pub fn add_input(&mut self, reactor: ReactorKey, name: &str) -> Result<PortKey> {
        self.add_port(reactor, name, PortSide::Input)
    }

    pub fn add_output(&mut self, reactor: ReactorKey, name: &str) -> Result<PortKey> {
        self.add_port(reactor, name, PortSide::Output)
    }

    fn add_port(&mut self, reactor: ReactorKey, name: &str, side: PortSide) -> Result<PortKey> {
        self.check_reactor(reactor)?;
        self.claim_member_name(reactor, name)?;
        let key = PortKey(self.ports.len() as u32);
        self.ports.push(PortDecl {
            key,
            reactor,
            name: self.qualify(reactor, name),
            side,
        });
        Ok(key)
    }

    /// Add a timer firing first at `offset`, then every `period` if one is
    /// given.
    pub fn add_timer(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        offset: Duration,
        period: Option<Duration>,
    ) -> Result<TimerKey> {
        self.check_reactor(reactor)?;
        self.claim_member_name(reactor, name)?;
        if let Some(period) = period
            && period.is_zero()
        {
            return Err(Error::InvalidDeclaration {
                item: self.qualify(reactor, name),
                reason: "timer period is zero".to_string(),
            });
        }
        let key = TimerKey(self.timers.len() as u32);
        self.timers.push(TimerDecl {
            key,
            reactor,
            name: self.qualify(reactor, name),
            offset,
            period,
        });
        Ok(key)
    }

    /// Add a schedulable action with the given minimum delay.
    pub fn add_action(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        min_delay: Duration,
    ) -> Result<ActionKey> {
        self.check_reactor(reactor)?;
        self.claim_member_name(reactor, name)?;
        let key = ActionKey(self.actions.len() as u32);
        self.actions.push(ActionDecl {
            key,
            reactor,
            name: self.qualify(reactor, name),
            min_delay,
        });
        Ok(key)
    }

    /// Add a reaction. Declaration order among one reactor's reactions is
    /// their priority; the body is the opaque callable invoked by the
    /// scheduler.
    pub fn add_reaction(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        triggers: &[TriggerKey],
        reads: &[PortKey],
        effects: &[EffectKey],
        body: ReactionFn,
    ) -> Result<ReactionKey> {
        self.check_reactor(reactor)?;
        self.claim_member_name(reactor, name)?;
        let qualified = self.qualify(reactor, name);

        for trigger in triggers {
            match *trigger {
                TriggerKey::Startup | TriggerKey::Shutdown => {}
                TriggerKey::Timer(t) => self.check_owned_timer(reactor, t, &qualified)?,
                // Actions are a cross-reactor channel: any reaction may be
                // triggered by one, only the owner may schedule it.
                TriggerKey::Action(a) => self.check_action(a)?,
                TriggerKey::Port(p) => self.check_visible_port(reactor, p, &qualified, false)?,
            }
        }
        for &port in reads {
            self.check_visible_port(reactor, port, &qualified, false)?;
        }
        for effect in effects {
            match *effect {
                EffectKey::Port(p) => self.check_visible_port(reactor, p, &qualified, true)?,
                EffectKey::Action(a) => self.check_owned_action(reactor, a, &qualified)?,
            }
        }

        let key = ReactionKey(self.reactions.len() as u32);
        self.reactions.push(ReactionDecl {
            key,
            reactor,
            name: qualified,
            triggers: triggers.to_vec(),
            reads: reads.to_vec(),
            effects: effects.to_vec(),
        });
        self.bodies.push(body);
        Ok(key)
    }

    /// Establish a fixed directed edge from an output to an input. A zero
    /// delay (or None) is a direct same-tag wire; a positive delay turns
    /// the connection into an implicit scheduled delivery.
    pub fn connect(
        &mut self,
        source: PortKey,
        dest: PortKey,
        delay: Option<Duration>,
    ) -> Result<()> {
        self.check_port(source)?;
        self.check_port(dest)?;
        let src = &self.ports[source.index()];
        let dst = &self.ports[dest.index()];

        let fail = |reason: &str| Error::MalformedConnection {
            src: src.name.clone(),
            dest: dst.name.clone(),
            reason: reason.to_string(),
        };

        if src.side != PortSide::Output {
            return Err(fail("source is not an output port"));
        }
        if dst.side != PortSide::Input {
            return Err(fail("destination is not an input port"));
        }
        if src.reactor == dst.reactor {
            return Err(fail("source and destination belong to the same reactor"));
        }
        if self
            .connections
            .iter()
            .any(|c| c.source == source && c.dest == dest)
        {
            return Err(fail("duplicate connection"));
        }
        if self.connections.iter().any(|c| c.dest == dest) {
            return Err(fail("destination already has an upstream connection"));
        }

        let delay = delay.filter(|d| !d.is_zero());
        self.connections.push(ConnectionDecl {
            source,
            dest,
            delay,
        });
        Ok(())
    }

    /// Validate the whole description and assemble the environment.
    pub fn build(self) -> Result<Environment> {
        let port_count = self.ports.len();
        let mut downstream: Vec<Vec<PortKey>> = vec![Vec::new(); port_count];
        let mut delayed: Vec<Vec<(PortKey, Duration)>> = vec![Vec::new(); port_count];
        for conn in &self.connections {
            match conn.delay {
                None => downstream[conn.source.index()].push(conn.dest),
                Some(d) => delayed[conn.source.index()].push((conn.dest, d)),
            }
        }

        let mut port_triggers: Vec<Vec<ReactionKey>> = vec![Vec::new(); port_count];
        let mut startup_reactions = Vec::new();
        let mut shutdown_reactions = Vec::new();
        let mut timer_triggers: Vec<Vec<ReactionKey>> = vec![Vec::new(); self.timers.len()];
        let mut action_triggers: Vec<Vec<ReactionKey>> = vec![Vec::new(); self.actions.len()];
        for decl in &self.reactions {
            for trigger in &decl.triggers {
                match *trigger {
                    TriggerKey::Startup => startup_reactions.push(decl.key),
                    TriggerKey::Shutdown => shutdown_reactions.push(decl.key),
                    TriggerKey::Timer(t) => timer_triggers[t.index()].push(decl.key),
                    TriggerKey::Action(a) => action_triggers[a.index()].push(decl.key),
                    TriggerKey::Port(p) => port_triggers[p.index()].push(decl.key),
                }
            }
        }

        let fabric = PortFabric::new(self.ports, downstream, delayed, port_triggers);
        let graph = DependencyGraph::build(&self.reactions, &fabric)?;

        info!(
            reactors = self.reactors.len(),
            reactions = self.reactions.len(),
            ports = fabric.len(),
            levels = graph.levels().len(),
            "environment assembled"
        );

        Ok(Environment::new(
            self.reactors,
            self.reactions,
            self.bodies,
            fabric,
            graph,
            self.timers,
            self.actions,
            startup_reactions,
            shutdown_reactions,
            timer_triggers,
            action_triggers,
        ))
    }

    fn qualify(&self, reactor: ReactorKey, name: &str) -> String {
        format!("{}.{}", self.reactors[reactor.index()].name, name)
    }

    fn check_reactor(&self, key: ReactorKey) -> Result<()> {
        if key.index() >= self.reactors.len() {
            return Err(Error::UnknownKey {
                kind: "reactor",
                key: key.0,
            });
        }
        Ok(())
    }

    fn check_port(&self, key: PortKey) -> Result<()> {
        if key.index() >= self.ports.len() {
            return Err(Error::UnknownKey {
                kind: "port",
                key: key.0,
            });
        }
        Ok(())
    }

    fn check_sibling_name(&self, name: &str, parent: Option<ReactorKey>) -> Result<()> {
        let full = match parent {
            Some(p) => format!("{}.{}", self.reactors[p.index()].name, name),
            None => name.to_string(),
        };
        let clash = self.reactors.iter().any(|r| {
            r.parent == parent && (r.name == full || r.name.starts_with(&format!("{full}[")))
        });
        if clash {
            return Err(Error::DuplicateName {
                reactor: match parent {
                    Some(p) => self.reactors[p.index()].name.clone(),
                    None => "<root>".to_string(),
                },
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn claim_member_name(&mut self, reactor: ReactorKey, name: &str) -> Result<()> {
        if !self.member_names[reactor.index()].insert(name.to_string()) {
            return Err(Error::DuplicateName {
                reactor: self.reactors[reactor.index()].name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn check_owned_timer(
        &self,
        reactor: ReactorKey,
        timer: TimerKey,
        reaction: &str,
    ) -> Result<()> {
        if timer.index() >= self.timers.len() {
            return Err(Error::UnknownKey {
                kind: "timer",
                key: timer.0,
            });
        }
        if self.timers[timer.index()].reactor != reactor {
            return Err(Error::InvalidDeclaration {
                item: reaction.to_string(),
                reason: format!(
                    "timer {} belongs to another reactor",
                    self.timers[timer.index()].name
                ),
            });
        }
        Ok(())
    }

    fn check_action(&self, action: ActionKey) -> Result<()> {
        if action.index() >= self.actions.len() {
            return Err(Error::UnknownKey {
                kind: "action",
                key: action.0,
            });
        }
        Ok(())
    }

    fn check_owned_action(
        &self,
        reactor: ReactorKey,
        action: ActionKey,
        reaction: &str,
    ) -> Result<()> {
        self.check_action(action)?;
        if self.actions[action.index()].reactor != reactor {
            return Err(Error::InvalidDeclaration {
                item: reaction.to_string(),
                reason: format!(
                    "action {} belongs to another reactor",
                    self.actions[action.index()].name
                ),
            });
        }
        Ok(())
    }

    /// A reaction sees its own ports and the opposite side of its direct
    /// children's ports: it may be triggered by / observe own inputs and
    /// child outputs, and (as effects) write own outputs and child inputs.
    fn check_visible_port(
        &self,
        reactor: ReactorKey,
        port: PortKey,
        reaction: &str,
        as_effect: bool,
    ) -> Result<()> {
        self.check_port(port)?;
        let decl = &self.ports[port.index()];
        let own = decl.reactor == reactor;
        let child = self.reactors[decl.reactor.index()].parent == Some(reactor);

        let visible = match (as_effect, decl.side) {
            (false, PortSide::Input) => own,
            (false, PortSide::Output) => child,
            (true, PortSide::Output) => own,
            (true, PortSide::Input) => child,
        };
        if !visible {
            return Err(Error::InvalidDeclaration {
                item: reaction.to_string(),
                reason: format!(
                    "port {} is not {} this reaction's reactor",
                    decl.name,
                    if as_effect { "writable from" } else { "visible to" }
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ReactionCtx;

    fn noop() -> ReactionFn {
        Box::new(|_: &mut ReactionCtx| Ok(()))
    }

    #[test]
    fn test_duplicate_member_name_rejected() {
        let mut builder = EnvBuilder::new();
        let r = builder.add_reactor("main", None).unwrap();
        builder.add_output(r, "out").unwrap();

        let result = builder.add_input(r, "out");
        assert!(matches!(result, Err(Error::DuplicateName { .. })));
    }

    #[test]
    fn test_connection_direction_checked() {
        let mut builder = EnvBuilder::new();
        let a = builder.add_reactor("a", None).unwrap();
        let b = builder.add_reactor("b", None).unwrap();
        let a_in = builder.add_input(a, "in").unwrap();
        let b_in = builder.add_input(b, "in").unwrap();

        let result = builder.connect(a_in, b_in, None);
        assert!(matches!(result, Err(Error::MalformedConnection { .. })));
    }

    #[test]
    fn test_double_upstream_rejected() {
        let mut builder = EnvBuilder::new();
        let a = builder.add_reactor("a", None).unwrap();
        let b = builder.add_reactor("b", None).unwrap();
        let c = builder.add_reactor("c", None).unwrap();
        let a_out = builder.add_output(a, "out").unwrap();
        let b_out = builder.add_output(b, "out").unwrap();
        let c_in = builder.add_input(c, "in").unwrap();

        builder.connect(a_out, c_in, None).unwrap();
        let result = builder.connect(b_out, c_in, None);
        assert!(matches!(result, Err(Error::MalformedConnection { .. })));
    }

    #[test]
    fn test_effect_must_be_writable() {
        let mut builder = EnvBuilder::new();
        let a = builder.add_reactor("a", None).unwrap();
        let b = builder.add_reactor("b", None).unwrap();
        let b_out = builder.add_output(b, "out").unwrap();

        // a's reaction cannot write a sibling's output
        let result = builder.add_reaction(
            a,
            "bad",
            &[TriggerKey::Startup],
            &[],
            &[EffectKey::Port(b_out)],
            noop(),
        );
        assert!(matches!(result, Err(Error::InvalidDeclaration { .. })));
    }

    #[test]
    fn test_bank_instances_address_densely() {
        let mut builder = EnvBuilder::new();
        let containers = builder.add_bank("container", None, 3).unwrap();
        let mut codes = Vec::new();
        for &container in &containers {
            for key in builder.add_bank("node", Some(container), 4).unwrap() {
                codes.push(builder.reactors[key.index()].address().unwrap());
            }
        }
        codes.sort_unstable();
        assert_eq!(codes, (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_zero_delay_normalized_to_direct() {
        let mut builder = EnvBuilder::new();
        let a = builder.add_reactor("a", None).unwrap();
        let b = builder.add_reactor("b", None).unwrap();
        let a_out = builder.add_output(a, "out").unwrap();
        let b_in = builder.add_input(b, "in").unwrap();

        builder
            .connect(a_out, b_in, Some(Duration::ZERO))
            .unwrap();
        assert!(builder.connections[0].delay.is_none());
    }
}
