//! Reaction dependency graph
//!
//! Built once from the static structure. Nodes are reactions; edges run
//! from a reaction to every reaction that is triggered by, or observes, a
//! port it writes through the zero-delay connection closure, plus the
//! priority chain among siblings of one reactor. Topological levels give
//! the parallel execution schedule.

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::port::PortFabric;
use crate::types::{EffectKey, PortKey, ReactionKey, ReactorKey, TriggerKey};

/// Static description of one reaction.
///
/// Keys are assigned in declaration order; within one reactor that order
/// is the reaction's priority.
#[derive(Debug, Clone)]
pub struct ReactionDecl {
    pub key: ReactionKey,
    pub reactor: ReactorKey,
    pub name: String,
    pub triggers: Vec<TriggerKey>,
    /// Ports observed without triggering.
    pub reads: Vec<PortKey>,
    pub effects: Vec<EffectKey>,
}

/// The leveled execution schedule over all reactions.
///
/// Reactions within one level share no dependency and may run in
/// parallel; a reaction only starts once every upstream reaction at the
/// current tag has committed, which leveled execution guarantees.
#[derive(Debug)]
pub struct DependencyGraph {
    levels: Vec<Vec<ReactionKey>>,
    level_of: Vec<u32>,
}

impl DependencyGraph {
    /// Build the graph and its topological levels. A cycle not broken by
    /// a positive-delay connection is a build-time fatal error.
    pub fn build(decls: &[ReactionDecl], fabric: &PortFabric) -> Result<Self> {
        let n = decls.len();

        // Reactions observing each port (non-triggering reads)
        let mut readers: IndexMap<PortKey, Vec<ReactionKey>> = IndexMap::new();
        for decl in decls {
            for &port in &decl.reads {
                readers.entry(port).or_default().push(decl.key);
            }
        }

        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];

        fn add_edge(
            edges: &mut [Vec<usize>],
            in_degree: &mut [usize],
            from: ReactionKey,
            to: ReactionKey,
        ) {
            if from == to {
                return;
            }
            if !edges[from.index()].contains(&to.index()) {
                edges[from.index()].push(to.index());
                in_degree[to.index()] += 1;
            }
        }

        // Priority chain: each reaction depends on its predecessor within
        // the same reactor.
        let mut previous: IndexMap<ReactorKey, ReactionKey> = IndexMap::new();
        for decl in decls {
            if let Some(&prev) = previous.get(&decl.reactor) {
                add_edge(&mut edges, &mut in_degree, prev, decl.key);
            }
            previous.insert(decl.reactor, decl.key);
        }

        // Effect edges: writer -> every same-tag consumer of the written
        // port's zero-delay closure. Positive-delay connections and action
        // effects reach future tags through the queue and contribute none.
        for decl in decls {
            for effect in &decl.effects {
                let EffectKey::Port(port) = *effect else {
                    continue;
                };
                for q in fabric.zero_delay_closure(port) {
                    for &consumer in fabric.triggered_reactions(q) {
                        add_edge(&mut edges, &mut in_degree, decl.key, consumer);
                    }
                    if let Some(observers) = readers.get(&q) {
                        for &consumer in observers {
                            add_edge(&mut edges, &mut in_degree, decl.key, consumer);
                        }
                    }
                }
            }
        }

        // Kahn's algorithm with level tracking
        let mut levels: Vec<Vec<ReactionKey>> = Vec::new();
        let mut level_of: Vec<u32> = vec![0; n];
        let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut processed = 0;

        while !current.is_empty() {
            // Sort for determinism
            current.sort_unstable();
            processed += current.len();

            let depth = levels.len() as u32;
            let mut next: Vec<usize> = Vec::new();
            for &i in &current {
                level_of[i] = depth;
                for &j in &edges[i] {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        next.push(j);
                    }
                }
            }

            levels.push(current.iter().map(|&i| decls[i].key).collect());
            current = next;
        }

        if processed != n {
            let reactions: Vec<String> = decls
                .iter()
                .filter(|d| in_degree[d.key.index()] > 0)
                .map(|d| d.name.clone())
                .collect();
            return Err(Error::CycleDetected { reactions });
        }

        Ok(DependencyGraph { levels, level_of })
    }

    pub fn levels(&self) -> &[Vec<ReactionKey>] {
        &self.levels
    }

    pub fn level_of(&self, reaction: ReactionKey) -> u32 {
        self.level_of[reaction.index()]
    }

    /// The deterministic total order among reactions: declaration order.
    /// Within one reactor this is the declared priority; across reactors
    /// sharing no dependency it fixes the commit order.
    pub fn priority_order(a: ReactionKey, b: ReactionKey) -> Ordering {
        a.cmp(&b)
    }

    pub fn reaction_count(&self) -> usize {
        self.level_of.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDecl, PortFabric, PortSide};

    fn make_fabric(
        ports: usize,
        downstream: Vec<Vec<PortKey>>,
        triggers: Vec<Vec<ReactionKey>>,
    ) -> PortFabric {
        let decls = (0..ports)
            .map(|i| PortDecl {
                key: PortKey(i as u32),
                reactor: ReactorKey(i as u32),
                name: format!("p{i}"),
                side: PortSide::Output,
            })
            .collect();
        PortFabric::new(decls, downstream, vec![Vec::new(); ports], triggers)
    }

    fn make_reaction(
        key: u32,
        reactor: u32,
        triggers: &[TriggerKey],
        effects: &[EffectKey],
    ) -> ReactionDecl {
        ReactionDecl {
            key: ReactionKey(key),
            reactor: ReactorKey(reactor),
            name: format!("r{key}"),
            triggers: triggers.to_vec(),
            reads: Vec::new(),
            effects: effects.to_vec(),
        }
    }

    #[test]
    fn test_chain_levels() {
        // r0 writes p0 -> p1 triggers r1; r1 writes p2 -> p3 triggers r2
        let fabric = make_fabric(
            4,
            vec![vec![PortKey(1)], vec![], vec![PortKey(3)], vec![]],
            vec![
                vec![],
                vec![ReactionKey(1)],
                vec![],
                vec![ReactionKey(2)],
            ],
        );
        let decls = vec![
            make_reaction(0, 0, &[TriggerKey::Startup], &[EffectKey::Port(PortKey(0))]),
            make_reaction(1, 1, &[TriggerKey::Port(PortKey(1))], &[EffectKey::Port(PortKey(2))]),
            make_reaction(2, 2, &[TriggerKey::Port(PortKey(3))], &[]),
        ];

        let graph = DependencyGraph::build(&decls, &fabric).unwrap();
        assert_eq!(graph.levels().len(), 3);
        assert_eq!(graph.level_of(ReactionKey(0)), 0);
        assert_eq!(graph.level_of(ReactionKey(1)), 1);
        assert_eq!(graph.level_of(ReactionKey(2)), 2);
    }

    #[test]
    fn test_independent_reactions_share_a_level() {
        let fabric = make_fabric(2, vec![vec![], vec![]], vec![vec![], vec![]]);
        let decls = vec![
            make_reaction(0, 0, &[TriggerKey::Startup], &[EffectKey::Port(PortKey(0))]),
            make_reaction(1, 1, &[TriggerKey::Startup], &[EffectKey::Port(PortKey(1))]),
        ];

        let graph = DependencyGraph::build(&decls, &fabric).unwrap();
        assert_eq!(graph.levels().len(), 1);
        assert_eq!(graph.levels()[0], vec![ReactionKey(0), ReactionKey(1)]);
    }

    #[test]
    fn test_priority_chain_orders_siblings() {
        // Two reactions of one reactor, no port dependency: still serialized
        let fabric = make_fabric(1, vec![vec![]], vec![vec![]]);
        let decls = vec![
            make_reaction(0, 0, &[TriggerKey::Startup], &[]),
            make_reaction(1, 0, &[TriggerKey::Startup], &[]),
        ];

        let graph = DependencyGraph::build(&decls, &fabric).unwrap();
        assert_eq!(graph.levels().len(), 2);
        assert!(graph.level_of(ReactionKey(0)) < graph.level_of(ReactionKey(1)));
    }

    #[test]
    fn test_cycle_is_fatal() {
        // r0 writes p0 which triggers r1; r1 writes p1 which triggers r0
        let fabric = make_fabric(
            2,
            vec![vec![], vec![]],
            vec![vec![ReactionKey(1)], vec![ReactionKey(0)]],
        );
        let decls = vec![
            make_reaction(0, 0, &[TriggerKey::Port(PortKey(1))], &[EffectKey::Port(PortKey(0))]),
            make_reaction(1, 1, &[TriggerKey::Port(PortKey(0))], &[EffectKey::Port(PortKey(1))]),
        ];

        let result = DependencyGraph::build(&decls, &fabric);
        assert!(matches!(result, Err(Error::CycleDetected { .. })));
    }

    #[test]
    fn test_observed_port_orders_reader_after_writer() {
        // r1 observes p0 without triggering; r0 writes p0
        let fabric = make_fabric(1, vec![vec![]], vec![vec![]]);
        let mut observer = make_reaction(1, 1, &[TriggerKey::Startup], &[]);
        observer.reads = vec![PortKey(0)];
        let decls = vec![
            make_reaction(0, 0, &[TriggerKey::Startup], &[EffectKey::Port(PortKey(0))]),
            observer,
        ];

        let graph = DependencyGraph::build(&decls, &fabric).unwrap();
        assert!(graph.level_of(ReactionKey(0)) < graph.level_of(ReactionKey(1)));
    }
}
