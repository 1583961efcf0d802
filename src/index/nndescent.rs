//! Approximate k-nearest-neighbor graph: NN-descent construction and
//! best-first search.
//!
//! Nodes are dense positions `0..n`. Both algorithms only see a cost oracle
//! (lower is better), so they are independent of feature kind and polarity.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use crate::core::config::GraphConfig;

/// Out-neighbors of every node, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnnGraph {
    pub neighbors: Vec<Vec<u32>>,
}

#[derive(Debug, Clone, Copy)]
struct Neighbor {
    id: u32,
    cost: f32,
    new: bool,
}

/// Bounded candidate list kept sorted by ascending cost.
struct Pool {
    entries: Vec<Neighbor>,
    capacity: usize,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Pool { entries: Vec::with_capacity(capacity + 1), capacity }
    }

    /// Returns true if the list changed.
    fn insert(&mut self, id: u32, cost: f32) -> bool {
        if self.entries.len() >= self.capacity {
            match self.entries.last() {
                Some(worst) if cost >= worst.cost => return false,
                _ => {}
            }
        }
        if self.entries.iter().any(|e| e.id == id) {
            return false;
        }
        let at = self.entries.partition_point(|e| e.cost <= cost);
        self.entries.insert(at, Neighbor { id, cost, new: true });
        self.entries.truncate(self.capacity);
        true
    }
}

/// Build a kNN graph over `n` nodes.
pub fn build<F>(n: usize, cost: F, config: &GraphConfig) -> KnnGraph
where
    F: Fn(usize, usize) -> f32 + Sync,
{
    if n < 2 {
        return KnnGraph { neighbors: vec![Vec::new(); n] };
    }
    let pool_size = config.pool_size.min(n - 1);
    let sample = config.sample.max(1);

    let mut pools: Vec<Pool> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
            let mut pool = Pool::new(pool_size);
            for j in rand::seq::index::sample(&mut rng, n - 1, pool_size).into_iter() {
                let j = if j >= i { j + 1 } else { j };
                pool.insert(j as u32, cost(i, j));
            }
            pool
        })
        .collect();

    let threshold = (config.delta as f64 * n as f64 * pool_size as f64) as usize;
    for iteration in 0..config.iterations {
        // Split each pool into sampled new neighbors and old ones.
        let mut new_lists: Vec<Vec<u32>> = vec![Vec::new(); n];
        let mut old_lists: Vec<Vec<u32>> = vec![Vec::new(); n];
        for (i, pool) in pools.iter_mut().enumerate() {
            let mut taken = 0;
            for e in pool.entries.iter_mut() {
                if e.new && taken < sample {
                    e.new = false;
                    new_lists[i].push(e.id);
                    taken += 1;
                } else if !e.new {
                    old_lists[i].push(e.id);
                }
            }
        }

        let mut rnew: Vec<Vec<u32>> = vec![Vec::new(); n];
        let mut rold: Vec<Vec<u32>> = vec![Vec::new(); n];
        for i in 0..n {
            for &j in &new_lists[i] {
                rnew[j as usize].push(i as u32);
            }
            for &j in &old_lists[i] {
                rold[j as usize].push(i as u32);
            }
        }

        let seed = config.seed.wrapping_add((iteration as u64 + 1) << 32);
        let joined: Vec<(Vec<u32>, Vec<u32>)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let mut fresh = new_lists[i].clone();
                fresh.extend(sampled(&rnew[i], sample, &mut rng));
                fresh.sort_unstable();
                fresh.dedup();
                let mut stale = old_lists[i].clone();
                stale.extend(sampled(&rold[i], sample, &mut rng));
                stale.sort_unstable();
                stale.dedup();
                (fresh, stale)
            })
            .collect();

        // Local join: every new-new and new-old pair around a node.
        let proposals: Vec<(u32, u32, f32)> = joined
            .par_iter()
            .flat_map_iter(|(fresh, stale)| {
                let mut out = Vec::new();
                for (a, &u) in fresh.iter().enumerate() {
                    for &v in fresh[a + 1..].iter().chain(stale.iter()) {
                        if u == v {
                            continue;
                        }
                        let c = cost(u as usize, v as usize);
                        out.push((u, v, c));
                        out.push((v, u, c));
                    }
                }
                out
            })
            .collect();

        let mut by_target: Vec<Vec<(u32, f32)>> = vec![Vec::new(); n];
        for (target, other, c) in proposals {
            by_target[target as usize].push((other, c));
        }
        let updates: usize = pools
            .par_iter_mut()
            .zip(by_target.par_iter())
            .map(|(pool, offers)| offers.iter().filter(|(id, c)| pool.insert(*id, *c)).count())
            .sum();

        tracing::debug!("NN-descent iteration {}: {} updates", iteration, updates);
        if updates <= threshold {
            break;
        }
    }

    let degree = config.degree.min(pool_size);
    KnnGraph {
        neighbors: pools
            .into_iter()
            .map(|p| p.entries.iter().take(degree).map(|e| e.id).collect())
            .collect(),
    }
}

fn sampled(list: &[u32], max: usize, rng: &mut StdRng) -> Vec<u32> {
    if list.len() <= max {
        return list.to_vec();
    }
    let mut out = list.to_vec();
    out.shuffle(rng);
    out.truncate(max);
    out
}

impl KnnGraph {
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Every neighbor id points inside the graph.
    pub fn is_consistent(&self) -> bool {
        let n = self.neighbors.len() as u32;
        self.neighbors.iter().all(|list| list.iter().all(|&j| j < n))
    }

    /// Best-first search from random entry points.
    ///
    /// Returns up to `k` `(node, cost)` pairs with `cost <= max_cost`,
    /// cheapest first.
    pub fn search<F>(
        &self,
        cost: F,
        k: usize,
        max_cost: f32,
        search_pool: usize,
        seeds: usize,
        seed: u64,
    ) -> Vec<(u32, f32)>
    where
        F: Fn(usize) -> f32,
    {
        let n = self.neighbors.len();
        if n == 0 || k == 0 {
            return Vec::new();
        }
        let capacity = search_pool.max(k);
        let mut visited = vec![false; n];
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat<f32>, u32)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat<f32>, u32)> = BinaryHeap::with_capacity(capacity + 1);

        let mut rng = StdRng::seed_from_u64(seed);
        for start in rand::seq::index::sample(&mut rng, n, seeds.clamp(1, n)).into_iter() {
            visited[start] = true;
            let c = OrderedFloat(cost(start));
            candidates.push(Reverse((c, start as u32)));
            results.push((c, start as u32));
        }
        while results.len() > capacity {
            results.pop();
        }

        while let Some(Reverse((c, node))) = candidates.pop() {
            if results.len() >= capacity && results.peek().is_some_and(|worst| c > worst.0) {
                break;
            }
            for &next in &self.neighbors[node as usize] {
                let next_idx = next as usize;
                if visited[next_idx] {
                    continue;
                }
                visited[next_idx] = true;
                let nc = OrderedFloat(cost(next_idx));
                let admit = results.len() < capacity || results.peek().is_some_and(|worst| nc < worst.0);
                if admit {
                    candidates.push(Reverse((nc, next)));
                    results.push((nc, next));
                    if results.len() > capacity {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(u32, f32)> = results
            .into_iter()
            .filter(|(c, _)| c.0 <= max_cost)
            .map(|(c, id)| (id, c.0))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        out.truncate(k);
        out
    }
}
