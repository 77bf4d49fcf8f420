//! Shortcut contraction for one hierarchy level
//!
//! A chain is a run of edges through nodes that only continue the road: the
//! node has exactly one way back and one way on among edges at least as
//! important as the road itself, and the way on has the same class, speeds
//! and access. Side roads of lesser importance (driveways, service roads)
//! do not break a chain.
//!
//! Each chain becomes one shortcut edge in its start node's tile. The
//! shortcut's speed is the length-weighted aggregate including the delay at
//! every interior node, and the tile's shortcut table records the ordered
//! original edges so the chain can be recovered exactly.

use std::collections::BTreeMap;

use butterfly_common::{Error, GraphId, Result};
use butterfly_io::{
    hierarchy, DirectedEdge, GraphTile, Node, ShortcutEntry, TileBuilder, TileSink, TileSource,
};
use rustc_hash::FxHashSet;
use tracing::{debug, info, trace};

use crate::config::ContractConfig;

/// Seconds lost passing through a node from one edge onto the next
pub trait TurnDelay {
    fn delay(&self, node_id: GraphId, node: &Node, inbound: GraphId, outbound: GraphId) -> f64;
}

/// Uses the pass-through delay stored on each node
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeTurnDelay;

impl TurnDelay for NodeTurnDelay {
    fn delay(&self, _node_id: GraphId, node: &Node, _inbound: GraphId, _outbound: GraphId) -> f64 {
        node.turn_delay_secs()
    }
}

/// Delay from a closure `(node, inbound, outbound) -> seconds`
pub struct TurnDelayFn<F>(pub F);

impl<F> TurnDelay for TurnDelayFn<F>
where
    F: Fn(GraphId, GraphId, GraphId) -> f64,
{
    fn delay(&self, node_id: GraphId, _node: &Node, inbound: GraphId, outbound: GraphId) -> f64 {
        (self.0)(node_id, inbound, outbound)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractStats {
    pub level: u8,
    pub tiles: usize,
    pub nodes: usize,
    pub original_edges: usize,
    /// Shortcuts from an earlier run, removed before rebuilding
    pub removed_shortcuts: usize,
    pub chains: usize,
    pub loops_skipped: usize,
    pub shortcuts: usize,
    /// Original edges covered by a shortcut
    pub contracted_edges: usize,
}

/// Contract `level` in place using each node's stored turn delay
pub fn contract<S>(store: &S, level: u8, config: &ContractConfig) -> Result<ContractStats>
where
    S: TileSource + TileSink + ?Sized,
{
    contract_with(store, level, config, &NodeTurnDelay)
}

/// Contract `level` in place with a custom delay model
pub fn contract_with<S, D>(
    store: &S,
    level: u8,
    config: &ContractConfig,
    delays: &D,
) -> Result<ContractStats>
where
    S: TileSource + TileSink + ?Sized,
    D: TurnDelay + ?Sized,
{
    let mut builder = ShortcutBuilder::load(store, level, config)?;
    builder.build(delays)?;
    builder.write(store)?;
    Ok(builder.stats().clone())
}

type PendingShortcut = (DirectedEdge, ShortcutEntry);

/// All tiles of one level held as builders while shortcuts are added
#[derive(Debug)]
pub struct ShortcutBuilder<'c> {
    level: u8,
    config: &'c ContractConfig,
    tiles: BTreeMap<u32, TileBuilder>,
    stats: ContractStats,
}

impl<'c> ShortcutBuilder<'c> {
    /// Read every tile of `level` and strip any shortcuts they hold
    pub fn load<S>(source: &S, level: u8, config: &'c ContractConfig) -> Result<Self>
    where
        S: TileSource + ?Sized,
    {
        config.validate()?;
        if hierarchy::level(level).is_none() {
            return Err(Error::InvalidArgument(format!(
                "level {level} is not in the hierarchy"
            )));
        }

        let mut stats = ContractStats {
            level,
            ..ContractStats::default()
        };
        let mut tiles = BTreeMap::new();
        for index in source.enumerate(level)? {
            let id = GraphId::new(level, index, 0);
            let tile = GraphTile::decode(source.read(id)?)?;
            if tile.id() != id {
                return Err(Error::format(format!(
                    "file for tile {id} holds tile {}",
                    tile.id()
                )));
            }
            let mut builder = TileBuilder::from_tile(&tile)?;
            stats.removed_shortcuts += builder.strip_shortcuts()?;
            stats.nodes += builder.nodes.len();
            stats.original_edges += builder.edges.len();
            tiles.insert(index, builder);
        }
        stats.tiles = tiles.len();

        debug!(
            level,
            tiles = stats.tiles,
            nodes = stats.nodes,
            edges = stats.original_edges,
            removed = stats.removed_shortcuts,
            "loaded level for contraction"
        );
        Ok(Self {
            level,
            config,
            tiles,
            stats,
        })
    }

    pub fn stats(&self) -> &ContractStats {
        &self.stats
    }

    pub fn tiles(&self) -> impl Iterator<Item = &TileBuilder> {
        self.tiles.values()
    }

    /// Find every chain and append its shortcut to the start node's tile
    pub fn build<D: TurnDelay + ?Sized>(&mut self, delays: &D) -> Result<()> {
        let mut pending: BTreeMap<GraphId, Vec<PendingShortcut>> = BTreeMap::new();
        let mut chains = 0;
        let mut loops = 0;
        let mut contracted = 0;

        for (&tile_index, tile) in &self.tiles {
            let base = GraphId::new(self.level, tile_index, 0);
            for (n, node) in tile.nodes.iter().enumerate() {
                let node_id = base.with_index(n as u32);
                for edge_index in node.edge_range() {
                    let edge_id = base.with_index(edge_index);
                    let edge = self.edge(edge_id)?;
                    if !self.eligible(edge) || self.continues_through(node_id, edge_id)? {
                        continue;
                    }

                    let chain = self.walk(node_id, edge_id)?;
                    if chain.len() < 2 {
                        continue;
                    }
                    let last = chain[chain.len() - 1];
                    if self.edge(last)?.end_node == node_id {
                        trace!(start = %node_id, edges = chain.len(), "skipping loop");
                        loops += 1;
                        continue;
                    }
                    chains += 1;

                    let mut start = node_id;
                    for piece in split_chain(&chain, self.config.max_chain_edges) {
                        let piece_end = self.edge(piece[piece.len() - 1])?.end_node;
                        if piece.len() >= 2 {
                            let Some(shortcut) = self.summarize(piece, delays)? else {
                                trace!(start = %start, "delay cannot slow a 1 kph chain");
                                start = piece_end;
                                continue;
                            };
                            trace!(
                                start = %start,
                                end = %piece_end,
                                edges = piece.len(),
                                speed = shortcut.0.speed,
                                "chain"
                            );
                            pending.entry(start).or_default().push(shortcut);
                            contracted += piece.len();
                        }
                        start = piece_end;
                    }
                }
            }
        }

        let mut added = 0;
        for (start, shortcuts) in pending {
            let tile = self.tiles.get_mut(&start.tile_index()).ok_or_else(|| {
                Error::format(format!("chain starts in missing tile {}", start.tile_base()))
            })?;
            added += tile.add_shortcuts(start.index(), shortcuts)?.len();
        }

        self.stats.chains += chains;
        self.stats.loops_skipped += loops;
        self.stats.shortcuts += added;
        self.stats.contracted_edges += contracted;
        Ok(())
    }

    /// Encode every tile and hand it to `sink`
    pub fn write<S: TileSink + ?Sized>(&self, sink: &S) -> Result<()> {
        for (&index, tile) in &self.tiles {
            sink.write(GraphId::new(self.level, index, 0), &tile.encode()?)?;
        }
        info!(
            level = self.level,
            tiles = self.stats.tiles,
            chains = self.stats.chains,
            shortcuts = self.stats.shortcuts,
            "contracted level"
        );
        Ok(())
    }

    fn tile(&self, id: GraphId) -> Option<&TileBuilder> {
        if id.level() != self.level {
            return None;
        }
        self.tiles.get(&id.tile_index())
    }

    fn node(&self, id: GraphId) -> Option<&Node> {
        self.tile(id)?.nodes.get(id.index() as usize)
    }

    fn edge(&self, id: GraphId) -> Result<&DirectedEdge> {
        self.tile(id)
            .and_then(|t| t.edges.get(id.index() as usize))
            .ok_or_else(|| Error::format(format!("edge {id} is not on level {}", self.level)))
    }

    /// Original outbound edges of a node on this level
    fn out_edges(&self, node: GraphId) -> Vec<(GraphId, DirectedEdge)> {
        let (Some(tile), Some(n)) = (self.tile(node), self.node(node)) else {
            return Vec::new();
        };
        let base = node.tile_base();
        n.edge_range()
            .filter_map(|i| tile.edges.get(i as usize).map(|e| (base.with_index(i), *e)))
            .collect()
    }

    fn eligible(&self, edge: &DirectedEdge) -> bool {
        !edge.is_shortcut()
            && edge.speed > 0
            && edge.allows(self.config.access_mask)
            && self.node(edge.end_node).is_some()
    }

    /// The edge continuing a chain that reached `node` from `from` over
    /// `inbound`; `None` when `node` is a junction or the road changes
    fn continuation(&self, node: GraphId, from: GraphId, inbound: &DirectedEdge) -> Option<GraphId> {
        let mut relevant = 0;
        let mut back = 0;
        let mut onward = None;
        for (id, e) in self.out_edges(node) {
            if e.end_node.level() != self.level || !e.road_class.at_least(inbound.road_class) {
                continue;
            }
            relevant += 1;
            if e.end_node == from {
                back += 1;
            } else if e.end_node != node {
                onward = Some((id, e));
            }
        }
        if relevant != 2 || back != 1 {
            return None;
        }

        let (id, e) = onward?;
        let same_road = e.road_class == inbound.road_class
            && e.speed == inbound.speed
            && e.effective_truck_speed() == inbound.effective_truck_speed()
            && e.forward_access == inbound.forward_access
            && e.reverse_access == inbound.reverse_access;
        (same_road && self.eligible(&e)).then_some(id)
    }

    /// Whether some inbound edge passes through `node` onto `edge`, making
    /// `edge` the middle of a chain rather than its start
    fn continues_through(&self, node: GraphId, edge: GraphId) -> Result<bool> {
        for (_, out) in self.out_edges(node) {
            let from = out.end_node;
            if from == node || self.node(from).is_none() {
                continue;
            }
            for (_, inbound) in self.out_edges(from) {
                if inbound.end_node == node
                    && self.eligible(&inbound)
                    && self.continuation(node, from, &inbound) == Some(edge)
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Follow continuations from `first` until the road ends, branches or
    /// comes back to a node already on the chain
    fn walk(&self, start: GraphId, first: GraphId) -> Result<Vec<GraphId>> {
        let mut chain = vec![first];
        let mut visited = FxHashSet::default();
        visited.insert(start);

        let (mut from, mut current) = (start, first);
        loop {
            let edge = self.edge(current)?;
            let node = edge.end_node;
            if !visited.insert(node) {
                break;
            }
            match self.continuation(node, from, edge) {
                Some(next) => {
                    chain.push(next);
                    from = node;
                    current = next;
                }
                None => break,
            }
        }
        Ok(chain)
    }

    /// Shortcut edge and table entry for a connected run of edges
    fn summarize<D: TurnDelay + ?Sized>(
        &self,
        piece: &[GraphId],
        delays: &D,
    ) -> Result<Option<PendingShortcut>> {
        let mut length = 0u64;
        let mut time = 0.0;
        let mut truck_time = 0.0;
        let mut total_delay = 0.0;
        let mut slowest = u8::MAX;
        let mut slowest_truck = u8::MAX;
        let mut prev: Option<(GraphId, &DirectedEdge)> = None;

        for &id in piece {
            let edge = self.edge(id)?;
            if let Some((prev_id, prev_edge)) = prev {
                let via = prev_edge.end_node;
                let node = self
                    .node(via)
                    .ok_or_else(|| Error::format(format!("chain passes missing node {via}")))?;
                let delay = delays.delay(via, node, prev_id, id);
                if delay.is_finite() && delay > 0.0 {
                    total_delay += delay;
                }
            }
            length += u64::from(edge.length_m);
            time += travel_secs(edge.length_m, edge.speed);
            truck_time += travel_secs(edge.length_m, edge.effective_truck_speed());
            slowest = slowest.min(edge.speed);
            slowest_truck = slowest_truck.min(edge.effective_truck_speed());
            prev = Some((id, edge));
        }
        time += total_delay;
        truck_time += total_delay;

        let length_m = u32::try_from(length).map_err(|_| {
            Error::ResourceExhausted(format!("chain of {} edges is {length} m long", piece.len()))
        })?;
        let mut speed = aggregate_speed(length, time);
        let mut truck_speed = aggregate_speed(length, truck_time);
        // Any delay must show in the aggregate; at 1 kph there is no room
        if total_delay > 0.0 {
            if slowest <= 1 || slowest_truck <= 1 {
                return Ok(None);
            }
            speed = speed.min(slowest - 1);
            truck_speed = truck_speed.min(slowest_truck - 1);
        }

        let first = self.edge(piece[0])?;
        let last = self.edge(piece[piece.len() - 1])?;
        let edge = DirectedEdge::new(last.end_node, length_m, speed, first.road_class)
            .with_truck_speed(truck_speed)
            .with_access(first.forward_access, first.reverse_access);
        let entry = ShortcutEntry {
            shortcut: GraphId::INVALID,
            time_ds: to_deciseconds(time),
            truck_time_ds: to_deciseconds(truck_time),
            edges: piece.to_vec(),
        };
        Ok(Some((edge, entry)))
    }
}

fn travel_secs(length_m: u32, kph: u8) -> f64 {
    f64::from(length_m) * 3.6 / f64::from(kph.max(1))
}

/// Whole kph covering `length_m` in `secs`, floored, at least 1
fn aggregate_speed(length_m: u64, secs: f64) -> u8 {
    if secs <= 0.0 {
        return 1;
    }
    // Nudge so exact results do not floor one below after rounding error
    let kph = (length_m as f64 * 3.6 / secs + 1e-9).floor();
    kph.clamp(1.0, f64::from(u8::MAX)) as u8
}

fn to_deciseconds(secs: f64) -> u32 {
    (secs * 10.0).round().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Split a chain into pieces of at most `max` edges, sized as evenly as
/// possible. With `max >= 3` every piece has at least two edges; with
/// `max == 2` an odd chain leaves one single edge, which stays uncontracted.
fn split_chain(chain: &[GraphId], max: usize) -> Vec<&[GraphId]> {
    if chain.len() <= max {
        return vec![chain];
    }
    let pieces = chain.len().div_ceil(max);
    let base = chain.len() / pieces;
    let extra = chain.len() % pieces;

    let mut out = Vec::with_capacity(pieces);
    let mut at = 0;
    for i in 0..pieces {
        let len = base + usize::from(i < extra);
        out.push(&chain[at..at + len]);
        at += len;
    }
    out
}
