//! Open-addressed id → coordinate store.
//!
//! Coordinates are kept as 32-bit offsets from [`ORIGIN`] at [`SCALE`] units
//! per degree, so an entry costs 16 bytes whatever the coordinate.

use tracing::debug;

use crate::models::Coordinate;

/// Slot marker; id 0 can never be stored.
const EMPTY: u64 = 0;
const MIX: u64 = 0x9E37_79B9_7F4A_7C15;
const MAX_LOAD: f64 = 0.7;
const MIN_CAPACITY: usize = 16;

/// Offsets are measured from here.
pub const ORIGIN: Coordinate = Coordinate::new(0.0, 0.0);
/// Units per degree. `180 * SCALE` still fits an `i32`.
pub const SCALE: f64 = 1e7;

/// Linear-probing hash map from 64-bit ids to quantized coordinates.
///
/// Re-inserting an id overwrites its coordinate. The table doubles when
/// the load factor passes 0.7.
pub struct CoordinateIndex {
    ids: Vec<u64>,
    dx: Vec<i32>,
    dy: Vec<i32>,
    len: usize,
    mask: usize,
}

impl Default for CoordinateIndex {
    fn default() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }
}

impl CoordinateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index that holds `expected` entries without resizing.
    pub fn with_capacity(expected: usize) -> Self {
        let wanted = ((expected as f64 / MAX_LOAD).ceil() as usize).max(MIN_CAPACITY);
        let capacity = wanted.next_power_of_two();
        Self {
            ids: vec![EMPTY; capacity],
            dx: vec![0; capacity],
            dy: vec![0; capacity],
            len: 0,
            mask: capacity - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    /// Record or overwrite the coordinate for `id`. Id 0 is ignored.
    pub fn put(&mut self, id: u64, coordinate: Coordinate) {
        if id == EMPTY {
            debug!("Ignoring coordinate for reserved id 0");
            return;
        }
        if (self.len + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
            self.grow();
        }

        let (x, y) = quantize(coordinate);
        let slot = self.find_slot(id);
        if self.ids[slot] == EMPTY {
            self.ids[slot] = id;
            self.len += 1;
        }
        self.dx[slot] = x;
        self.dy[slot] = y;
    }

    /// Look up the coordinate stored for `id`.
    pub fn get(&self, id: u64) -> Option<Coordinate> {
        if id == EMPTY {
            return None;
        }
        let slot = self.find_slot(id);
        (self.ids[slot] == id).then(|| dequantize(self.dx[slot], self.dy[slot]))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Slot holding `id`, or the empty slot where it would go.
    fn find_slot(&self, id: u64) -> usize {
        let mut slot = start_slot(id, self.mask);
        loop {
            let current = self.ids[slot];
            if current == id || current == EMPTY {
                return slot;
            }
            slot = (slot + 1) & self.mask;
        }
    }

    fn grow(&mut self) {
        let capacity = self.capacity() * 2;
        debug!("Resizing coordinate index to {} slots", capacity);

        let ids = std::mem::replace(&mut self.ids, vec![EMPTY; capacity]);
        let dx = std::mem::replace(&mut self.dx, vec![0; capacity]);
        let dy = std::mem::replace(&mut self.dy, vec![0; capacity]);
        self.mask = capacity - 1;

        for ((id, x), y) in ids.into_iter().zip(dx).zip(dy) {
            if id == EMPTY {
                continue;
            }
            let slot = self.find_slot(id);
            self.ids[slot] = id;
            self.dx[slot] = x;
            self.dy[slot] = y;
        }
    }
}

/// Multiplicative hash keeping the top `log2(capacity)` bits of the product.
///
/// Every key bit reaches the top of the product, so the OSM type bits in
/// way and relation keys move them away from the node with the same id.
fn start_slot(id: u64, mask: usize) -> usize {
    let bits = mask.count_ones();
    (id.wrapping_mul(MIX) >> (64 - bits)) as usize
}

fn quantize(coordinate: Coordinate) -> (i32, i32) {
    let x = ((coordinate.lon - ORIGIN.lon) * SCALE).round() as i32;
    let y = ((coordinate.lat - ORIGIN.lat) * SCALE).round() as i32;
    (x, y)
}

fn dequantize(x: i32, y: i32) -> Coordinate {
    Coordinate::new(
        ORIGIN.lon + x as f64 / SCALE,
        ORIGIN.lat + y as f64 / SCALE,
    )
}
