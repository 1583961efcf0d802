//! Earth mover's distance with an extra-mass penalty (EMD-hat).
//!
//! Solved as a transportation problem: supply bins ship to demand bins along
//! successive shortest paths. Ground costs are non-negative, so Dijkstra with
//! node potentials replaces Bellman-Ford, and the dense bipartite layout keeps
//! each round at `O(supply * demand)`.

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Source,
    Supply(usize),
    Demand(usize),
    Sink,
}

/// Residual state of a transportation problem with a super source and sink.
struct Transport {
    cost: Vec<Vec<f64>>,
    /// Supply not yet shipped, and supply shipped (the reverse source edge).
    supply: Vec<f64>,
    sent: Vec<f64>,
    /// Demand not yet met, and demand met (the reverse sink edge).
    demand: Vec<f64>,
    received: Vec<f64>,
    flow: Vec<Vec<f64>>,
}

impl Transport {
    fn new(supply: Vec<f64>, demand: Vec<f64>, cost: Vec<Vec<f64>>) -> Self {
        let (a, b) = (supply.len(), demand.len());
        Transport {
            cost,
            sent: vec![0.0; a],
            received: vec![0.0; b],
            flow: vec![vec![0.0; b]; a],
            supply,
            demand,
        }
    }

    fn nodes(&self) -> usize {
        self.supply.len() + self.demand.len() + 2
    }

    fn node(&self, index: usize) -> Node {
        let a = self.supply.len();
        match index {
            0 => Node::Source,
            i if i <= a => Node::Supply(i - 1),
            i if i <= a + self.demand.len() => Node::Demand(i - 1 - a),
            _ => Node::Sink,
        }
    }

    fn index(&self, node: Node) -> usize {
        let a = self.supply.len();
        match node {
            Node::Source => 0,
            Node::Supply(i) => 1 + i,
            Node::Demand(j) => 1 + a + j,
            Node::Sink => 1 + a + self.demand.len(),
        }
    }

    /// Residual edges leaving `node` as `(target, cost, capacity)`.
    fn edges(&self, node: Node, out: &mut Vec<(Node, f64, f64)>) {
        out.clear();
        match node {
            Node::Source => {
                for (i, s) in self.supply.iter().enumerate() {
                    out.push((Node::Supply(i), 0.0, *s));
                }
            }
            Node::Supply(i) => {
                out.push((Node::Source, 0.0, self.sent[i]));
                for (j, c) in self.cost[i].iter().enumerate() {
                    out.push((Node::Demand(j), *c, f64::INFINITY));
                }
            }
            Node::Demand(j) => {
                out.push((Node::Sink, 0.0, self.demand[j]));
                for (i, row) in self.flow.iter().enumerate() {
                    out.push((Node::Supply(i), -self.cost[i][j], row[j]));
                }
            }
            Node::Sink => {
                for (j, r) in self.received.iter().enumerate() {
                    out.push((Node::Demand(j), 0.0, *r));
                }
            }
        }
    }

    fn capacity(&self, from: Node, to: Node) -> f64 {
        match (from, to) {
            (Node::Source, Node::Supply(i)) => self.supply[i],
            (Node::Supply(i), Node::Source) => self.sent[i],
            (Node::Supply(_), Node::Demand(_)) => f64::INFINITY,
            (Node::Demand(j), Node::Supply(i)) => self.flow[i][j],
            (Node::Demand(j), Node::Sink) => self.demand[j],
            (Node::Sink, Node::Demand(j)) => self.received[j],
            _ => 0.0,
        }
    }

    fn push(&mut self, from: Node, to: Node, amount: f64) {
        match (from, to) {
            (Node::Source, Node::Supply(i)) => {
                self.supply[i] -= amount;
                self.sent[i] += amount;
            }
            (Node::Supply(i), Node::Source) => {
                self.sent[i] -= amount;
                self.supply[i] += amount;
            }
            (Node::Supply(i), Node::Demand(j)) => self.flow[i][j] += amount,
            (Node::Demand(j), Node::Supply(i)) => self.flow[i][j] -= amount,
            (Node::Demand(j), Node::Sink) => {
                self.demand[j] -= amount;
                self.received[j] += amount;
            }
            (Node::Sink, Node::Demand(j)) => {
                self.received[j] -= amount;
                self.demand[j] += amount;
            }
            _ => {}
        }
    }

    /// Ship up to `want` units at minimum cost; returns the transport cost.
    fn solve(&mut self, mut want: f64) -> f64 {
        let n = self.nodes();
        let source = self.index(Node::Source);
        let sink = self.index(Node::Sink);
        let mut potential = vec![0.0f64; n];
        let mut edges = Vec::new();

        while want > EPS {
            let mut dist = vec![f64::INFINITY; n];
            let mut prev: Vec<Option<usize>> = vec![None; n];
            let mut done = vec![false; n];
            dist[source] = 0.0;

            // Dense Dijkstra on reduced costs.
            loop {
                let mut u = None;
                for v in 0..n {
                    if !done[v] && dist[v].is_finite() && u.is_none_or(|w: usize| dist[v] < dist[w]) {
                        u = Some(v);
                    }
                }
                let Some(u) = u else { break };
                done[u] = true;
                self.edges(self.node(u), &mut edges);
                for &(to, cost, cap) in &edges {
                    if cap <= EPS {
                        continue;
                    }
                    let v = self.index(to);
                    let reduced = (cost + potential[u] - potential[v]).max(0.0);
                    if dist[u] + reduced < dist[v] {
                        dist[v] = dist[u] + reduced;
                        prev[v] = Some(u);
                    }
                }
            }
            if !dist[sink].is_finite() {
                break;
            }
            for v in 0..n {
                potential[v] += dist[v].min(dist[sink]);
            }

            let mut amount = want;
            let mut v = sink;
            while let Some(u) = prev[v] {
                amount = amount.min(self.capacity(self.node(u), self.node(v)));
                v = u;
            }
            if amount <= EPS {
                break;
            }
            let mut v = sink;
            while let Some(u) = prev[v] {
                self.push(self.node(u), self.node(v), amount);
                v = u;
            }
            want -= amount;
        }

        self.flow
            .iter()
            .zip(&self.cost)
            .map(|(flows, costs)| flows.iter().zip(costs).map(|(f, c)| f * c).sum::<f64>())
            .sum()
    }
}

/// EMD-hat between histograms `p` and `q` over the same `n` bins with ground
/// distance `cost[i][j]`.
///
/// The unmatched mass `|sum(p) - sum(q)|` is charged `extra_mass_penalty`
/// per unit; a negative penalty means the largest ground distance.
pub fn emd_hat(p: &[f64], q: &[f64], cost: &[Vec<f64>], extra_mass_penalty: f64) -> f64 {
    debug_assert_eq!(p.len(), q.len());
    let penalty = if extra_mass_penalty < 0.0 {
        cost.iter().flat_map(|row| row.iter().copied()).fold(0.0, f64::max)
    } else {
        extra_mass_penalty
    };

    let sources: Vec<usize> = (0..p.len()).filter(|&i| p[i] > 0.0).collect();
    let sinks: Vec<usize> = (0..q.len()).filter(|&j| q[j] > 0.0).collect();
    let sum_p: f64 = sources.iter().map(|&i| p[i]).sum();
    let sum_q: f64 = sinks.iter().map(|&j| q[j]).sum();

    let ground = sources
        .iter()
        .map(|&i| sinks.iter().map(|&j| cost[i][j].max(0.0)).collect())
        .collect();
    let mut problem = Transport::new(
        sources.iter().map(|&i| p[i]).collect(),
        sinks.iter().map(|&j| q[j]).collect(),
        ground,
    );
    problem.solve(sum_p.min(sum_q)) + (sum_p - sum_q).abs() * penalty
}
