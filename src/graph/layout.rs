// src/graph/layout.rs
//! Force-directed 2-D layout of the assembly graph.
//!
//! Long-edge removal needs a geometric notion of edge tension: components
//! are embedded with a Fruchterman-Reingold style simulation (Barnes-Hut
//! quadtree for repulsion, linear attraction along real and transitive
//! links) and each edge's weight becomes the embedded distance between its
//! endpoints.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::graph::assembly::AssemblyGraph;

const NUM_ITERATIONS: u32 = 100;
const MIN_COMPONENT_SIZE: usize = 6;
const MIN_DISTANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Point {
    x: f64,
    y: f64,
}

impl Point {
    fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, other: Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y)
    }
}

impl std::ops::AddAssign for Point {
    fn add_assign(&mut self, other: Point) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl std::ops::Sub for Point {
    type Output = Point;
    fn sub(self, other: Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Point;
    fn mul(self, c: f64) -> Point {
        Point::new(self.x * c, self.y * c)
    }
}

impl std::ops::DivAssign<f64> for Point {
    fn div_assign(&mut self, c: f64) {
        self.x /= c;
        self.y /= c;
    }
}

/// Barnes-Hut quadtree over component positions.
struct Quadtree {
    nucleus: Point,
    width: f64,
    center: Point,
    mass: u32,
    subtrees: Vec<Quadtree>,
}

impl Quadtree {
    fn new(nucleus: Point, width: f64) -> Self {
        Self {
            nucleus,
            width,
            center: Point::default(),
            mass: 0,
            subtrees: Vec::new(),
        }
    }

    fn add(&mut self, p: Point) -> bool {
        if self.nucleus.x - self.width > p.x
            || p.x > self.nucleus.x + self.width
            || self.nucleus.y - self.width > p.y
            || p.y > self.nucleus.y + self.width
        {
            return false;
        }
        self.mass += 1;
        if self.mass == 1 {
            self.center = p;
        } else if self.subtrees.is_empty() {
            if self.center == p {
                return true;
            }
            let w = self.width / 2.0;
            self.subtrees = vec![
                Quadtree::new(Point::new(self.nucleus.x + w, self.nucleus.y + w), w),
                Quadtree::new(Point::new(self.nucleus.x - w, self.nucleus.y + w), w),
                Quadtree::new(Point::new(self.nucleus.x - w, self.nucleus.y - w), w),
                Quadtree::new(Point::new(self.nucleus.x + w, self.nucleus.y - w), w),
            ];
            let center = self.center;
            for it in &mut self.subtrees {
                if it.add(center) {
                    break;
                }
            }
        }
        for it in &mut self.subtrees {
            if it.add(p) {
                break;
            }
        }
        true
    }

    fn centre(&mut self) {
        if self.subtrees.is_empty() {
            return;
        }
        let mut center = Point::default();
        for it in &mut self.subtrees {
            it.centre();
            center += it.center * it.mass as f64;
        }
        center /= self.mass as f64;
        self.center = center;
    }

    /// Repulsive force on `p`, opening cells with `width * 2 / distance < 1`.
    fn force(&self, p: Point, k: f64) -> Point {
        let delta = p - self.center;
        let distance = delta.norm();
        if self.width * 2.0 / distance < 1.0 {
            return delta * (self.mass as f64 * (k * k) / (distance * distance));
        }
        let mut total = Point::default();
        for it in &self.subtrees {
            total += it.force(p, k);
        }
        total
    }
}

/// Embed each sufficiently complex component and write the resulting
/// endpoint distances into edge weights (mirrored onto pairs).
pub fn create_force_directed_layout(graph: &mut AssemblyGraph, seed: u64) {
    let mut components = graph.components();
    components.sort_by_key(|c| (std::cmp::Reverse(c.len()), c.iter().next().copied()));

    let mut rng = StdRng::seed_from_u64(seed);

    for component in components {
        if component.len() < MIN_COMPONENT_SIZE {
            continue;
        }
        if !component.iter().any(|&n| graph.node(n).is_junction()) {
            continue;
        }

        // transitive annotations may point outside after earlier passes
        for &n in &component {
            let valid: std::collections::BTreeSet<u32> = graph
                .node(n)
                .transitive
                .iter()
                .copied()
                .filter(|m| component.contains(m))
                .collect();
            graph.node_mut(n).transitive = valid;
        }

        let k = (1.0 / component.len() as f64).sqrt();
        let mut t = 0.1;
        let dt = t / (NUM_ITERATIONS + 1) as f64;

        let members: Vec<u32> = component.iter().copied().collect();
        let mut points: Vec<Point> = vec![Point::default(); graph.nodes.len()];
        for &n in &members {
            points[n as usize] = Point::new(rng.gen::<f64>(), rng.gen::<f64>());
        }

        let graph_ref: &AssemblyGraph = graph;
        for _ in 0..NUM_ITERATIONS {
            let mut x = Point::default();
            let mut y = Point::default();
            for &n in &members {
                x.x = x.x.min(points[n as usize].x);
                x.y = x.y.max(points[n as usize].x);
                y.x = y.x.min(points[n as usize].y);
                y.y = y.y.max(points[n as usize].y);
            }
            let w = (x.y - x.x) / 2.0;
            let h = (y.y - y.x) / 2.0;

            let mut tree = Quadtree::new(Point::new(x.x + w, y.x + h), w.max(h) + 0.01);
            for &n in &members {
                tree.add(points[n as usize]);
            }
            tree.centre();

            let displacements: Vec<Point> = members
                .par_iter()
                .map(|&n| {
                    let node = graph_ref.node(n);
                    let mut displacement = tree.force(points[n as usize], k);

                    let mut attract = |m: u32| {
                        let delta = points[n as usize] - points[m as usize];
                        let distance = delta.norm().max(MIN_DISTANCE);
                        displacement += delta * (-1.0 * distance / k);
                    };
                    for &e in &node.inedges {
                        attract(graph_ref.edge(e).tail & !1);
                    }
                    for &e in &node.outedges {
                        attract(graph_ref.edge(e).head & !1);
                    }
                    for &m in &node.transitive {
                        attract(m);
                    }

                    let mut length = displacement.norm();
                    if length < 0.01 {
                        length = 0.1;
                    }
                    displacement * (t / length)
                })
                .collect();

            for (i, &n) in members.iter().enumerate() {
                points[n as usize] += displacements[i];
            }
            t -= dt;
        }

        for i in 0..graph.edges.len() as u32 {
            if graph.edges[i as usize].is_none() || i & 1 == 1 {
                continue;
            }
            let (tail, head) = {
                let edge = graph.edge(i);
                (edge.tail & !1, edge.head & !1)
            };
            if component.contains(&tail) && component.contains(&head) {
                let weight = (points[tail as usize] - points[head as usize]).norm();
                graph.edge_mut(i).weight = weight;
                graph.edge_mut(i ^ 1).weight = weight;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quadtree_mass_and_force() {
        let mut tree = Quadtree::new(Point::new(0.5, 0.5), 0.51);
        for i in 0..8 {
            let f = i as f64 / 8.0;
            assert!(tree.add(Point::new(f, 1.0 - f)));
        }
        tree.centre();
        assert_eq!(tree.mass, 8);

        let force = tree.force(Point::new(2.0, 2.0), 0.5);
        // all mass is below-left, so the push points up-right
        assert!(force.x > 0.0 && force.y > 0.0);
    }

    #[test]
    fn test_quadtree_rejects_outside() {
        let mut tree = Quadtree::new(Point::new(0.5, 0.5), 0.5);
        assert!(!tree.add(Point::new(2.0, 2.0)));
        assert_eq!(tree.mass, 0);
    }

    #[test]
    fn test_quadtree_duplicate_points() {
        let mut tree = Quadtree::new(Point::new(0.5, 0.5), 0.5);
        assert!(tree.add(Point::new(0.3, 0.3)));
        assert!(tree.add(Point::new(0.3, 0.3)));
        assert_eq!(tree.mass, 2);
        assert!(tree.subtrees.is_empty());
    }
}
