use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Axis-aligned box in grid space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            min: Point::new(x1, y1),
            max: Point::new(x2, y2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: f32,
}

impl Circle {
    pub const fn new(x: f32, y: f32, radius: f32) -> Self {
        Self {
            center: Point::new(x, y),
            radius,
        }
    }

    fn bounds(&self) -> BBox {
        BBox::new(
            self.center.x - self.radius,
            self.center.y - self.radius,
            self.center.x + self.radius,
            self.center.y + self.radius,
        )
    }
}

/// Geometry an element was inserted with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Box(BBox),
    Circle(Circle),
}

fn boxes_collide(a: &BBox, b: &BBox) -> bool {
    a.min.x <= b.max.x && b.min.x <= a.max.x && a.min.y <= b.max.y && b.min.y <= a.max.y
}

fn circles_collide(a: &Circle, b: &Circle) -> bool {
    let dx = b.center.x - a.center.x;
    let dy = b.center.y - a.center.y;
    let r = a.radius + b.radius;
    dx * dx + dy * dy <= r * r
}

fn circle_and_box_collide(circle: &Circle, bbox: &BBox) -> bool {
    let nearest_x = circle.center.x.clamp(bbox.min.x, bbox.max.x);
    let nearest_y = circle.center.y.clamp(bbox.min.y, bbox.max.y);
    let dx = circle.center.x - nearest_x;
    let dy = circle.center.y - nearest_y;
    dx * dx + dy * dy <= circle.radius * circle.radius
}

/// Uniform grid over `width x height`. Every element is stored once in a
/// flat vector and referenced by index from each cell its bounds overlap.
/// Cell coordinates are clamped, so geometry outside the nominal area lands
/// in the border cells instead of being dropped.
pub struct GridIndex<T> {
    width: f32,
    height: f32,
    x_cell_count: usize,
    y_cell_count: usize,
    x_scale: f32,
    y_scale: f32,
    box_elements: Vec<(T, BBox)>,
    circle_elements: Vec<(T, Circle)>,
    box_cells: Vec<Vec<usize>>,
    circle_cells: Vec<Vec<usize>>,
}

impl<T> GridIndex<T> {
    pub fn new(width: f32, height: f32, cell_size: u32) -> Self {
        let cell_size = cell_size.max(1) as f32;
        let x_cell_count = (width / cell_size).ceil().max(1.0) as usize;
        let y_cell_count = (height / cell_size).ceil().max(1.0) as usize;
        let cell_count = x_cell_count * y_cell_count;
        Self {
            width,
            height,
            x_cell_count,
            y_cell_count,
            x_scale: x_cell_count as f32 / width.max(f32::EPSILON),
            y_scale: y_cell_count as f32 / height.max(f32::EPSILON),
            box_elements: Vec::new(),
            circle_elements: Vec::new(),
            box_cells: vec![Vec::new(); cell_count],
            circle_cells: vec![Vec::new(); cell_count],
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.box_elements.len() + self.circle_elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert_box(&mut self, item: T, bbox: BBox) {
        let uid = self.box_elements.len();
        let (x1, y1, x2, y2) = self.cell_range(&bbox);
        for row in y1..=y2 {
            for col in x1..=x2 {
                self.box_cells[row * self.x_cell_count + col].push(uid);
            }
        }
        self.box_elements.push((item, bbox));
    }

    pub fn insert_circle(&mut self, item: T, circle: Circle) {
        let uid = self.circle_elements.len();
        let (x1, y1, x2, y2) = self.cell_range(&circle.bounds());
        for row in y1..=y2 {
            for col in x1..=x2 {
                self.circle_cells[row * self.x_cell_count + col].push(uid);
            }
        }
        self.circle_elements.push((item, circle));
    }

    /// Visits every element overlapping `query`, each at most once. The
    /// visitor returns `true` to stop the walk.
    pub fn visit<'a, F>(&'a self, query: &Shape, mut visit: F)
    where
        F: FnMut(&'a T, &Shape) -> bool,
    {
        let bounds = match query {
            Shape::Box(bbox) => *bbox,
            Shape::Circle(circle) => circle.bounds(),
        };
        let (x1, y1, x2, y2) = self.cell_range(&bounds);
        let mut seen_boxes = HashSet::new();
        let mut seen_circles = HashSet::new();

        for row in y1..=y2 {
            for col in x1..=x2 {
                let cell = row * self.x_cell_count + col;

                for &uid in &self.box_cells[cell] {
                    if !seen_boxes.insert(uid) {
                        continue;
                    }
                    let (item, bbox) = &self.box_elements[uid];
                    let hit = match query {
                        Shape::Box(q) => boxes_collide(q, bbox),
                        Shape::Circle(q) => circle_and_box_collide(q, bbox),
                    };
                    if hit && visit(item, &Shape::Box(*bbox)) {
                        return;
                    }
                }

                for &uid in &self.circle_cells[cell] {
                    if !seen_circles.insert(uid) {
                        continue;
                    }
                    let (item, circle) = &self.circle_elements[uid];
                    let hit = match query {
                        Shape::Box(q) => circle_and_box_collide(circle, q),
                        Shape::Circle(q) => circles_collide(q, circle),
                    };
                    if hit && visit(item, &Shape::Circle(*circle)) {
                        return;
                    }
                }
            }
        }
    }

    pub fn query(&self, bbox: &BBox) -> Vec<&T> {
        self.collect(&Shape::Box(*bbox))
    }

    pub fn query_circle(&self, circle: &Circle) -> Vec<&T> {
        self.collect(&Shape::Circle(*circle))
    }

    pub fn hit_test(&self, bbox: &BBox) -> bool {
        self.any(&Shape::Box(*bbox))
    }

    pub fn hit_test_circle(&self, circle: &Circle) -> bool {
        self.any(&Shape::Circle(*circle))
    }

    fn collect(&self, query: &Shape) -> Vec<&T> {
        let mut result = Vec::new();
        self.visit(query, |item, _| {
            result.push(item);
            false
        });
        result
    }

    fn any(&self, query: &Shape) -> bool {
        let mut hit = false;
        self.visit(query, |_, _| {
            hit = true;
            true
        });
        hit
    }

    fn cell_range(&self, bbox: &BBox) -> (usize, usize, usize, usize) {
        (
            self.cell_x(bbox.min.x),
            self.cell_y(bbox.min.y),
            self.cell_x(bbox.max.x),
            self.cell_y(bbox.max.y),
        )
    }

    fn cell_x(&self, x: f32) -> usize {
        let col = (x * self.x_scale).floor();
        if col.is_nan() {
            return 0;
        }
        col.clamp(0.0, (self.x_cell_count - 1) as f32) as usize
    }

    fn cell_y(&self, y: f32) -> usize {
        let row = (y * self.y_scale).floor();
        if row.is_nan() {
            return 0;
        }
        row.clamp(0.0, (self.y_cell_count - 1) as f32) as usize
    }
}
