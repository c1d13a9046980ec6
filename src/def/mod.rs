//! The definition map: level-granular tracking of staged observations.
//!
//! For every `{node, predictor}` pair the map records which layer holds the
//! authoritative rank-ordered observation buffer and which of the two
//! buffers it occupies. A node inherits its parent's definitions until a
//! restage along that predictor supersedes them, so buffers restage lazily:
//! only when a pair becomes a split candidate, or when its layer is about
//! to fall off the deque or drops below the efficiency threshold.
//!
//! Index spaces are stable: successor cells subdivide their parent's cell
//! and terminalized subtrees retain their slots as gaps. Sources of
//! same-predictor restages therefore occupy disjoint spans, and restaging
//! parallelizes by predictor region without aliasing.

mod layer;

pub use layer::{DefCell, DefLayer, DenseCell, NodePath, NO_NODE};

use std::collections::VecDeque;

use rayon::prelude::*;

use crate::config::Parallelism;
use crate::frame::PredictorFrame;
use crate::obs::{IdxPath, Obs, ObsPart, StageCount, PATH_MAX};
use crate::util::IndexRange;

/// Restage coordinate: an ancestor pair awaiting redistribution.
#[derive(Clone, Copy, Debug)]
pub struct RestageCoord {
    pub mrra_idx: u32,
    pub pred_idx: u32,
    pub del: u8,
    pub buf: u8,
}

/// Work order for one restage, resolved against the source layer.
struct RestageJob {
    src_buf: u8,
    /// Source cell with implicit entries excluded.
    range: IndexRange,
    implicit: u32,
    del: usize,
    targets: Vec<NodePath>,
}

/// Per-target result of a restage.
struct TargetOutcome {
    front_idx: u32,
    pred_idx: u32,
    rank_count: u32,
    has_implicit: bool,
    margin: u32,
    implicit: u32,
    src_dense: bool,
}

/// Deque of definition layers for one tree.
pub struct DefMap {
    n_pred: usize,
    /// Front at index zero; back-distance equals position.
    layers: VecDeque<DefLayer>,
    /// Per-sample branching paths, subtree-relative.
    st_path: IdxPath,
    split_count: usize,
    split_prev: usize,
    /// Ancestor node index per `{front node, back level}`.
    history: Vec<u32>,
    history_prev: Vec<u32>,
    /// Back-distance of the authoritative layer per `{front node, pred}`.
    layer_delta: Vec<u8>,
    delta_prev: Vec<u8>,
    /// Conservative run counts per `{front node, pred}`.
    run_count: Vec<u32>,
    restage_coords: Vec<RestageCoord>,
    /// Rear layers flushed this level, pending erasure after restaging.
    flush_count: usize,
    efficiency: f64,
    track_dense: bool,
}

impl DefMap {
    pub fn new(frame: &PredictorFrame, bag_count: usize, efficiency: f64) -> Self {
        let n_pred = frame.n_pred();
        let track_dense = frame.ranked().any_implicit();

        let mut front = DefLayer::new(1, n_pred, track_dense);
        front.init_ancestor(0, IndexRange::new(0, bag_count));

        let mut layers = VecDeque::new();
        layers.push_front(front);

        Self {
            n_pred,
            layers,
            st_path: IdxPath::new(bag_count),
            split_count: 1,
            split_prev: 0,
            history: Vec::new(),
            history_prev: Vec::new(),
            layer_delta: vec![0; n_pred],
            delta_prev: Vec::new(),
            run_count: vec![0; n_pred],
            restage_coords: Vec::new(),
            flush_count: 0,
            efficiency,
            track_dense,
        }
    }

    /// Records one definition per predictor from the root staging pass.
    pub fn root_def(&mut self, frame: &PredictorFrame, stage_counts: &[StageCount], bag_count: usize) {
        for (pred_idx, stage) in stage_counts.iter().enumerate() {
            let implicit = (bag_count - stage.idx_expl) as u32;
            self.layers[0].define(0, pred_idx, 0, stage.singleton);
            if implicit > 0 {
                self.layers[0].set_dense(0, pred_idx, 0, implicit);
            }
            self.run_count[pred_idx] = if stage.singleton {
                1
            } else if frame.is_factor(pred_idx) {
                frame.cardinality(pred_idx)
            } else {
                0
            };
        }
    }

    #[inline]
    fn delta(&self, node_idx: usize, pred_idx: usize) -> usize {
        self.layer_delta[node_idx * self.n_pred + pred_idx] as usize
    }

    /// Ancestor of a front node at back-distance `del`.
    #[inline]
    fn ancestor(&self, node_idx: usize, del: usize) -> usize {
        if del == 0 {
            node_idx
        } else {
            self.history[node_idx + self.split_count * (del - 1)] as usize
        }
    }

    /// Flushes the definition reaching a front pair, scheduling a restage
    /// unless singleton.
    fn reach_flush(&mut self, node_idx: usize, pred_idx: usize) {
        let del = self.delta(node_idx, pred_idx);
        if del == 0 {
            return;
        }
        let mrra_idx = self.ancestor(node_idx, del);
        self.flush_def(del, mrra_idx, pred_idx);
    }

    /// Removes a definition from a back layer and defines each front node
    /// it reaches.
    fn flush_def(&mut self, del: usize, mrra_idx: usize, pred_idx: usize) {
        if !self.layers[del].is_defined(mrra_idx, pred_idx) {
            return;
        }
        let (buf, singleton) = self.layers[del].consume(mrra_idx, pred_idx);

        let fronts: Vec<u32> = self.layers[del]
            .paths_of(mrra_idx)
            .iter()
            .map(|path| path.front_idx)
            .filter(|&idx| idx != NO_NODE)
            .collect();
        for front_idx in fronts {
            self.front_def(front_idx as usize, pred_idx, 1 - buf, singleton);
        }

        if !singleton {
            self.restage_coords.push(RestageCoord {
                mrra_idx: mrra_idx as u32,
                pred_idx: pred_idx as u32,
                del: del as u8,
                buf,
            });
        }
    }

    fn front_def(&mut self, node_idx: usize, pred_idx: usize, buf: u8, singleton: bool) {
        if self.layers[0].define(node_idx, pred_idx, buf, singleton) {
            self.layer_delta[node_idx * self.n_pred + pred_idx] = 0;
        }
    }

    /// Marks a pair as a split candidate for this level.
    ///
    /// Flushes its definition to the front and returns true unless the pair
    /// is a singleton. Restage coordinates accumulate as a side effect.
    pub fn preschedule(&mut self, node_idx: usize, pred_idx: usize) -> bool {
        self.reach_flush(node_idx, pred_idx);
        !self.layers[0].is_singleton(node_idx, pred_idx)
    }

    /// Walks the rear of the deque: drops what no longer reaches, flushes
    /// what is about to fall off or is too sparse to keep.
    pub fn flush_rear(&mut self) {
        let mut unflush_top = self.layers.len() - 1;

        // Capacity: one front layer plus `PATH_MAX` back layers. At
        // capacity the rear layer is flushed wholesale so the coming
        // overlap cannot push it off the deque.
        if self.layers.len() > PATH_MAX {
            self.flush_layer(unflush_top);
            unflush_top -= 1;
        }

        // Walks backward from the rear, purging non-reaching definitions.
        // Stops at the first layer with nothing to purge.
        for off in (1..=unflush_top).rev() {
            if !self.layers[off].nonreach_purge() {
                break;
            }
        }

        let back_def: usize = (1..=unflush_top).map(|off| self.layers[off].def_count()).sum();
        let mut thresh = (back_def as f64 * self.efficiency) as usize;
        for off in (1..=unflush_top).rev() {
            let def_count = self.layers[off].def_count();
            if def_count <= thresh {
                thresh -= def_count;
                self.flush_layer(off);
                unflush_top -= 1;
            } else {
                break;
            }
        }

        // Flushed layers persist through restaging for path lookup.
        self.flush_count = self.layers.len() - 1 - unflush_top;
    }

    fn flush_layer(&mut self, off: usize) {
        for (node_idx, pred_idx) in self.layers[off].defined_pairs() {
            self.flush_def(off, node_idx, pred_idx);
        }
    }

    /// Executes all scheduled restages, then erases flushed layers.
    pub fn restage_all(&mut self, obs_part: &mut ObsPart, parallel: Parallelism) {
        let coords = std::mem::take(&mut self.restage_coords);

        // Group jobs by predictor: each predictor's buffer region is
        // written by at most its own job list.
        let mut jobs: Vec<Vec<RestageJob>> = (0..self.n_pred).map(|_| Vec::new()).collect();
        for coord in &coords {
            let layer = &self.layers[coord.del as usize];
            let mrra_idx = coord.mrra_idx as usize;
            let pred_idx = coord.pred_idx as usize;
            let cell = layer.cell(mrra_idx);
            jobs[pred_idx].push(RestageJob {
                src_buf: coord.buf,
                range: layer.adjust_range(mrra_idx, pred_idx, cell),
                implicit: layer.dense(mrra_idx, pred_idx).implicit,
                del: coord.del as usize,
                targets: layer.paths_of(mrra_idx).to_vec(),
            });
        }

        let bag_count = obs_part.bag_count();
        let stride = obs_part.region_stride();
        let st_path = &self.st_path;

        let outcomes: Vec<TargetOutcome> = if parallel.allows_parallel() {
            obs_part
                .all_mut()
                .par_chunks_mut(stride)
                .enumerate()
                .flat_map_iter(|(pred_idx, region)| {
                    run_restage_jobs(region, bag_count, st_path, pred_idx, &jobs[pred_idx])
                })
                .collect()
        } else {
            obs_part
                .all_mut()
                .chunks_mut(stride)
                .enumerate()
                .flat_map(|(pred_idx, region)| {
                    run_restage_jobs(region, bag_count, st_path, pred_idx, &jobs[pred_idx])
                })
                .collect()
        };

        for out in outcomes {
            let node_idx = out.front_idx as usize;
            let pred_idx = out.pred_idx as usize;
            if out.src_dense {
                self.layers[0].set_dense(node_idx, pred_idx, out.margin, out.implicit);
            }
            self.set_run_count(node_idx, pred_idx, out.has_implicit, out.rank_count);
        }

        for _ in 0..self.flush_count {
            self.layers.pop_back();
        }
        self.flush_count = 0;
    }

    /// Records a restaged pair's run count; a count of one marks the pair
    /// singleton for the remainder of training.
    fn set_run_count(&mut self, node_idx: usize, pred_idx: usize, has_implicit: bool, rank_count: u32) {
        let count = rank_count + u32::from(has_implicit);
        self.run_count[node_idx * self.n_pred + pred_idx] = count;
        if count == 1 {
            self.layers[0].set_singleton(node_idx, pred_idx);
        }
    }

    /// Pushes a new front layer for the coming level.
    ///
    /// `split_next` of zero ends restaging; the map retires quietly.
    pub fn overlap(&mut self, split_next: usize) {
        self.split_prev = self.split_count;
        self.split_count = split_next;
        if split_next == 0 {
            return;
        }

        self.layers
            .push_front(DefLayer::new(split_next, self.n_pred, self.track_dense));

        self.history_prev = std::mem::take(&mut self.history);
        self.history = vec![0; split_next * (self.layers.len() - 1)];

        self.delta_prev = std::mem::take(&mut self.layer_delta);
        self.layer_delta = vec![0; split_next * self.n_pred];

        self.run_count = vec![0; split_next * self.n_pred];

        for layer in self.layers.iter_mut().skip(1) {
            layer.deepen();
        }
    }

    /// Registers a new front node: ancestry, inherited deltas and reaching
    /// paths at every back layer.
    pub fn reaching_path(
        &mut self,
        split_idx: usize,
        par_idx: usize,
        buf_range: IndexRange,
        path: u8,
    ) {
        let n_back = self.layers.len() - 1;
        for back in 0..n_back {
            self.history[split_idx + self.split_count * back] = if back == 0 {
                par_idx as u32
            } else {
                self.history_prev[par_idx + self.split_prev * (back - 1)]
            };
        }

        for pred_idx in 0..self.n_pred {
            self.layer_delta[split_idx * self.n_pred + pred_idx] =
                1 + self.delta_prev[par_idx * self.n_pred + pred_idx];
        }

        self.layers[0].init_ancestor(split_idx, buf_range);

        for del in 1..=n_back {
            let mrra_idx = self.ancestor(split_idx, del);
            let bits = path & IdxPath::mask(del);
            self.layers[del].path_init(mrra_idx, bits, split_idx as u32, buf_range);
        }
    }

    /// Appends a branch decision to a live sample's path.
    #[inline]
    pub fn advance_sample(&mut self, s_idx: usize, sense_true: bool) {
        self.st_path.advance(s_idx, sense_true);
    }

    /// Retires a sample whose node has terminalized.
    #[inline]
    pub fn extinct_sample(&mut self, s_idx: usize) {
        self.st_path.set_extinct(s_idx);
    }

    #[inline]
    pub fn sample_live(&self, s_idx: usize) -> bool {
        self.st_path.is_live(s_idx)
    }

    /// Whether the front pair has collapsed to a single run.
    #[inline]
    pub fn is_singleton(&self, node_idx: usize, pred_idx: usize) -> bool {
        self.layers[0].is_singleton(node_idx, pred_idx)
    }

    /// Authoritative buffer of a front pair.
    #[inline]
    pub fn front_buf(&self, node_idx: usize, pred_idx: usize) -> u8 {
        self.layers[0].buf(node_idx, pred_idx)
    }

    /// Conservative run count of a front pair.
    #[inline]
    pub fn run_count(&self, node_idx: usize, pred_idx: usize) -> u32 {
        self.run_count[node_idx * self.n_pred + pred_idx]
    }

    /// Explicit-entry range and implicit count for a front candidate.
    pub fn candidate_range(
        &self,
        node_idx: usize,
        pred_idx: usize,
        nominal: IndexRange,
    ) -> (IndexRange, u32) {
        let range = self.layers[0].adjust_range(node_idx, pred_idx, nominal);
        let implicit = self.layers[0].dense(node_idx, pred_idx).implicit;
        (range, implicit)
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

/// Distributes one predictor's scheduled restages into path buckets.
///
/// The first pass tallies live entries per reaching path; dense sources
/// then pack their explicit entries from the source start, recording
/// per-target margins. The second pass writes the complementary buffer and
/// tracks per-target run counts.
fn run_restage_jobs(
    region: &mut [Obs],
    bag_count: usize,
    st_path: &IdxPath,
    pred_idx: usize,
    jobs: &[RestageJob],
) -> Vec<TargetOutcome> {
    let mut outcomes = Vec::new();
    if jobs.is_empty() {
        return outcomes;
    }

    let (buf0, buf1) = ObsPart::split_region(region, bag_count);
    for job in jobs {
        let (src, dst): (&[Obs], &mut [Obs]) = if job.src_buf == 0 {
            (&buf0[..], &mut buf1[..])
        } else {
            (&buf1[..], &mut buf0[..])
        };

        let n_paths = 1usize << job.del;
        let mask = IdxPath::mask(job.del);

        // Pass one: live entries per path bucket.
        let mut path_count = vec![0usize; n_paths];
        for obs in &src[job.range.iter()] {
            if let Some(path) = st_path.live_path(obs.s_idx as usize) {
                path_count[(path & mask) as usize] += 1;
            }
        }

        // Destination offsets: target cell starts, or packed from the
        // source start when the source carries an implicit run.
        let mut reach_offset: Vec<usize> = job.targets.iter().map(|t| t.range.start).collect();
        let mut margin = vec![0u32; n_paths];
        let mut implicit = vec![0u32; n_paths];
        if job.implicit > 0 {
            let mut idx_left = job.range.start;
            for path in 0..n_paths {
                let target = &job.targets[path];
                if target.front_idx != NO_NODE {
                    margin[path] = (target.range.start - idx_left) as u32;
                    implicit[path] = (target.range.extent - path_count[path]) as u32;
                    reach_offset[path] = idx_left;
                    idx_left += path_count[path];
                }
            }
        }

        // Pass two: distribute and count rank transitions per bucket.
        let mut rank_prev = vec![u32::MAX; n_paths];
        let mut rank_count = vec![0u32; n_paths];
        for idx in job.range.iter() {
            let obs = src[idx];
            if let Some(path) = st_path.live_path(obs.s_idx as usize) {
                let bucket = (path & mask) as usize;
                dst[reach_offset[bucket]] = obs;
                reach_offset[bucket] += 1;
                if obs.rank != rank_prev[bucket] {
                    rank_count[bucket] += 1;
                    rank_prev[bucket] = obs.rank;
                }
            }
        }

        for path in 0..n_paths {
            let target = &job.targets[path];
            if target.front_idx != NO_NODE {
                outcomes.push(TargetOutcome {
                    front_idx: target.front_idx,
                    pred_idx: pred_idx as u32,
                    rank_count: rank_count[path],
                    has_implicit: path_count[path] != target.range.extent,
                    margin: margin[path],
                    implicit: implicit[path],
                    src_dense: job.implicit > 0,
                });
            }
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;
    use crate::sample::{Response, SampledObs, SamplerNux};

    fn full_bag(n: usize) -> Vec<SamplerNux> {
        (0..n)
            .map(|i| SamplerNux::new(u32::from(i > 0), 1))
            .collect()
    }

    fn staged_fixture() -> (PredictorFrame, ObsPart, DefMap) {
        let frame = FrameBuilder::new(8)
            .add_numeric(vec![5.0, 1.0, 7.0, 3.0, 6.0, 2.0, 8.0, 4.0])
            .build()
            .unwrap();
        let (response, _) =
            Response::regression((0..8).map(|i| i as f64 * 10.0).collect()).unwrap();
        let sampled = SampledObs::new(&full_bag(8), &response);
        let mut part = ObsPart::new(1, 8);
        let counts = part.stage(&frame, &sampled);
        let mut map = DefMap::new(&frame, 8, 0.15);
        map.root_def(&frame, &counts, 8);
        (frame, part, map)
    }

    #[test]
    fn test_root_def_and_preschedule() {
        let (_, _, mut map) = staged_fixture();
        assert!(map.preschedule(0, 0));
        assert_eq!(map.front_buf(0, 0), 0);
        assert_eq!(map.layer_count(), 1);
    }

    #[test]
    fn test_restage_splits_by_path() {
        let (_, mut part, mut map) = staged_fixture();
        assert!(map.preschedule(0, 0));

        // Split: samples with predictor value <= 4.0 (ranks 0..4) go true.
        // In staged order, the first four entries are the true side.
        let true_samples: Vec<u32> = part.buf(0, 0)[..4].iter().map(|o| o.s_idx).collect();
        for s_idx in 0..8 {
            map.advance_sample(s_idx, true_samples.contains(&(s_idx as u32)));
        }

        map.overlap(2);
        map.reaching_path(0, 0, IndexRange::new(0, 4), 0);
        map.reaching_path(1, 0, IndexRange::new(4, 4), 1);

        map.flush_rear();
        assert!(map.preschedule(0, 0));
        assert!(map.preschedule(1, 0));
        map.restage_all(&mut part, Parallelism::Sequential);

        // Both children now authoritative in buffer 1.
        assert_eq!(map.front_buf(0, 0), 1);
        assert_eq!(map.front_buf(1, 0), 1);
        assert_eq!(map.layer_count(), 2);

        let buf = part.buf(0, 1);
        let left: Vec<u32> = buf[0..4].iter().map(|o| o.s_idx).collect();
        let right: Vec<u32> = buf[4..8].iter().map(|o| o.s_idx).collect();
        for s in &left {
            assert!(true_samples.contains(s));
        }
        for s in &right {
            assert!(!true_samples.contains(s));
        }
        // Rank order preserved within each child.
        assert!(buf[0..4].windows(2).all(|w| w[0].rank <= w[1].rank));
        assert!(buf[4..8].windows(2).all(|w| w[0].rank <= w[1].rank));

        assert_eq!(map.run_count(0, 0), 4);
        assert_eq!(map.run_count(1, 0), 4);
    }

    #[test]
    fn test_extinct_samples_skipped() {
        let (_, mut part, mut map) = staged_fixture();
        assert!(map.preschedule(0, 0));

        let true_samples: Vec<u32> = part.buf(0, 0)[..4].iter().map(|o| o.s_idx).collect();
        for s_idx in 0..8u32 {
            if true_samples.contains(&s_idx) {
                map.advance_sample(s_idx as usize, true);
            } else {
                map.extinct_sample(s_idx as usize);
            }
        }

        map.overlap(1);
        map.reaching_path(0, 0, IndexRange::new(0, 4), 0);
        map.flush_rear();
        assert!(map.preschedule(0, 0));
        map.restage_all(&mut part, Parallelism::Sequential);

        let buf = part.buf(0, 1);
        let restaged: Vec<u32> = buf[0..4].iter().map(|o| o.s_idx).collect();
        assert_eq!(restaged.len(), 4);
        for s in &restaged {
            assert!(true_samples.contains(s));
        }
    }

    #[test]
    fn test_singleton_never_restages() {
        let frame = FrameBuilder::new(4)
            .add_numeric(vec![2.0, 2.0, 2.0, 2.0])
            .build()
            .unwrap();
        let (response, _) = Response::regression(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let sampled = SampledObs::new(&full_bag(4), &response);
        let mut part = ObsPart::new(1, 4);
        let counts = part.stage(&frame, &sampled);
        let mut map = DefMap::new(&frame, 4, 0.15);
        map.root_def(&frame, &counts, 4);

        assert!(!map.preschedule(0, 0));
        assert_eq!(map.run_count(0, 0), 1);
    }

    #[test]
    fn test_layer_depth_bounded() {
        // Drive many levels with a single surviving node and verify the
        // deque never exceeds its capacity.
        let (_, mut part, mut map) = staged_fixture();
        let mut extent = 8usize;
        let mut level = 0;
        while extent > 1 {
            map.flush_rear();
            map.preschedule(0, 0);
            map.restage_all(&mut part, Parallelism::Sequential);

            // True side keeps all but the last staged entry.
            let buf = map.front_buf(0, 0);
            let last = part.buf(0, buf)[extent - 1].s_idx;
            for obs in &part.buf(0, buf)[..extent] {
                if obs.s_idx == last {
                    map.extinct_sample(obs.s_idx as usize);
                } else {
                    map.advance_sample(obs.s_idx as usize, true);
                }
            }
            extent -= 1;
            map.overlap(1);
            map.reaching_path(0, 0, IndexRange::new(0, extent), 0);
            level += 1;
            assert!(map.layer_count() <= PATH_MAX + 1, "level {level}");
        }
    }
}
