// SPDX-FileCopyrightText: © 2025 Beacon Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Computes a bounded-size edit script between two JSON values.
//!
//! [`delta`] answers one question: can `b` be expressed as an edit of `a`
//! in no more than `max_size` serialized bytes? On success the returned
//! value is a script for [`apply`](crate::ops::apply); on failure it is
//! `b` itself and the caller transmits the whole value.
//!
//! Arrays use an A* search over `(modified_length, prefix_match_index)`
//! states. The cost of a state is the serialized byte count of the script
//! emitted so far; successors change, insert or delete one element at the
//! first divergent index, merging with the immediately preceding operation
//! into range operations where adjacency allows. The heuristic never
//! overestimates: the remaining work costs at least the size difference of
//! the two array tails, and at least one delete (4 bytes) when `a`'s tail
//! is not smaller.

use crate::ops::Opcode;
use crate::value::Value;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Byte cost of the smallest possible delete operation: code, index and
/// two separating commas.
const MIN_DELETE_COST: usize = 4;

/// Minimum framing overhead of wrapping a script into an `edit_at`:
/// `,6,i,` around the nested script.
const EDIT_FRAMING_COST: usize = 5;

/// Computes an edit script turning `a` into `b`.
///
/// Returns `(true, script)` with `script.serialized_size() <= max_size`,
/// or `(false, b)` when no script within the budget exists. Equal
/// containers yield the empty script for any budget of at least two bytes.
pub fn delta(a: &Value, b: &Value, max_size: usize) -> (bool, Value) {
    match (a, b) {
        (Value::Array(from), Value::Array(to)) => {
            if a == b {
                return empty_script(b, max_size);
            }
            match array_delta(from, to, max_size) {
                Some(script) => (true, script),
                None => (false, b.clone()),
            }
        },
        (Value::Object(from), Value::Object(to)) => {
            if a == b {
                return empty_script(b, max_size);
            }
            match object_delta(from, to, max_size) {
                Some(script) => (true, script),
                None => (false, b.clone()),
            }
        },
        _ => (b.serialized_size() <= max_size, b.clone()),
    }
}

fn empty_script(b: &Value, max_size: usize) -> (bool, Value) {
    if max_size >= 2 {
        (true, Value::empty_array())
    } else {
        (false, b.clone())
    }
}

/// Serialized size of an operation segment rendered as a standalone array.
fn segment_size(ops: &[Value]) -> usize {
    let inner: usize = ops.iter().map(Value::serialized_size).sum();
    inner + 2 + ops.len().saturating_sub(1)
}

/// Per-vertex cost delta of appending a segment to the script: the
/// segment without its brackets, plus the comma joining it to the rest.
fn segment_cost(ops: &[Value]) -> usize {
    segment_size(ops) - 2 + 1
}

/// Suffix-size index over both arrays: `h(i, j)` estimates the remaining
/// bytes to edit `a[i..]` into `b[j..]`.
struct Heuristic {
    a: Vec<usize>,
    b: Vec<usize>,
}

impl Heuristic {
    fn new(a: &[Value], b: &[Value]) -> Self {
        Self { a: suffix_sizes(a), b: suffix_sizes(b) }
    }

    fn estimate(&self, a_index: i64, b_index: i64) -> usize {
        let a = self.a[clamp_index(a_index, self.a.len())];
        let b = self.b[clamp_index(b_index, self.b.len())];

        if a == b {
            0
        } else if b > a {
            b - a
        } else {
            MIN_DELETE_COST
        }
    }
}

fn clamp_index(index: i64, len: usize) -> usize {
    usize::try_from(index).map_or(0, |i| i.min(len - 1))
}

/// `result[i]` is the text length of the elements `i..` joined by commas.
fn suffix_sizes(items: &[Value]) -> Vec<usize> {
    let mut sizes = vec![0usize];
    for item in items.iter().rev() {
        sizes.push(sizes.last().copied().unwrap_or(0) + item.serialized_size() + 1);
    }
    // the first remaining element is not preceded by a comma
    for size in sizes.iter_mut().skip(1) {
        *size -= 1;
    }
    sizes.reverse();
    sizes
}

struct Vertex {
    /// Total length of the modified array in this state.
    length: i64,
    /// Elements before this index already match the target.
    index: i64,
    /// The pending (still mergeable) operation segment.
    op: Vec<Value>,
    prev: Option<usize>,
    cost: usize,
}

struct Search<'a> {
    a: &'a [Value],
    b: &'a [Value],
    max_size: usize,
    heuristic: Heuristic,
    arena: Vec<Vertex>,
    /// Best known script cost per `(length, index)` state.
    best: HashMap<(i64, i64), usize>,
    open: BinaryHeap<Reverse<(usize, i64, i64, usize)>>,
}

/// A candidate successor before it is committed to the open list.
struct Step {
    op: Vec<Value>,
    /// Merged steps replace the parent's pending segment instead of
    /// chaining after it.
    merged: bool,
    cost: usize,
    length: i64,
    index: i64,
}

fn array_delta(a: &[Value], b: &[Value], max_size: usize) -> Option<Value> {
    let heuristic = Heuristic::new(a, b);

    let first_costs = heuristic.estimate(0, 0) + 1;
    if first_costs > max_size {
        return None;
    }

    let mut search = Search {
        a,
        b,
        max_size,
        heuristic,
        arena: Vec::new(),
        best: HashMap::new(),
        open: BinaryHeap::new(),
    };

    let a_len = i64::try_from(a.len()).ok()?;
    search.arena.push(Vertex { length: a_len, index: 0, op: Vec::new(), prev: None, cost: 1 });
    search.best.insert((a_len, 0), 1);
    search.open.push(Reverse((first_costs, a_len, 0, 0)));

    while let Some(Reverse((_, length, index, at))) = search.open.pop() {
        if search.best.get(&(length, index)).is_some_and(|&c| c < search.arena[at].cost) {
            continue;
        }
        if let Some(goal) = search.expand(at) {
            return Some(search.assemble(goal));
        }
    }

    tracing::trace!(budget = max_size, "no edit script within budget");
    None
}

impl Search<'_> {
    /// Expands one state; returns the arena index of the goal when this
    /// state already matches the target completely.
    fn expand(&mut self, at: usize) -> Option<usize> {
        let (length, start_index) = (self.arena[at].length, self.arena[at].index);
        let a_len = self.a.len() as i64;
        let b_len = self.b.len() as i64;
        let inserts_so_far = length - a_len;

        let mut last_op = pending_opcode(&self.arena[at].op);

        // skip over the prefix that already matches; a merge is only legal
        // when the new operation is adjacent to the pending one
        let mut index = start_index;
        let max_index = length.min(b_len);
        while index != max_index
            && self.a[(index - inserts_so_far) as usize] == self.b[index as usize]
        {
            index += 1;
            last_op = None;
        }

        if index == b_len && index == length {
            return Some(at);
        }

        if index != b_len && index != length {
            let step = self.change_element(at, index, inserts_so_far, last_op);
            let estimate =
                self.heuristic.estimate(index - inserts_so_far + 1, index + 1);
            self.push(at, step, estimate);
        }

        if index != b_len {
            let step = self.insert_element(at, index, last_op);
            let estimate = self.heuristic.estimate(index - inserts_so_far, index + 1);
            self.push(at, step, estimate);
        }

        if index != length {
            let step = self.delete_element(at, index, last_op);
            let estimate = self.heuristic.estimate(index - inserts_so_far + 1, index);
            self.push(at, step, estimate);
        }

        None
    }

    fn push(&mut self, parent: usize, step: Step, estimate: usize) {
        if step.cost > self.max_size {
            return;
        }

        let state = (step.length, step.index);
        if self.best.get(&state).is_some_and(|&c| c <= step.cost) {
            return;
        }
        self.best.insert(state, step.cost);

        let prev = if step.merged { self.arena[parent].prev } else { Some(parent) };
        self.arena.push(Vertex {
            length: step.length,
            index: step.index,
            op: step.op,
            prev,
            cost: step.cost,
        });
        self.open.push(Reverse((
            step.cost + estimate,
            step.length,
            step.index,
            self.arena.len() - 1,
        )));
    }

    fn base_cost(&self, parent: usize, merged: bool) -> usize {
        if merged {
            self.arena[parent].prev.map_or(1, |p| self.arena[p].cost)
        } else {
            self.arena[parent].cost
        }
    }

    /// Replace the element at `index` with `b[index]`, or recursively edit
    /// it when that serializes smaller.
    fn change_element(
        &self,
        parent: usize,
        index: i64,
        inserts_so_far: i64,
        last_op: Option<Opcode>,
    ) -> Step {
        let a_elem = &self.a[(index - inserts_so_far) as usize];
        let b_elem = self.b[index as usize].clone();
        let last = &self.arena[parent].op;

        let (op, merged) = match last_op {
            // combine the previous update with this one to a range update
            Some(Opcode::UpdateAt) => (
                range_update(last[1].clone(), index + 1, vec![last[2].clone(), b_elem.clone()]),
                true,
            ),
            // a previous insert plus this update replace one source element
            // with two new ones
            Some(Opcode::InsertAt) => (
                range_update(
                    Value::Int(index - 1),
                    index,
                    vec![last[2].clone(), b_elem.clone()],
                ),
                true,
            ),
            Some(Opcode::DeleteAt) => {
                (range_update(Value::Int(index), index + 2, vec![b_elem.clone()]), true)
            },
            Some(Opcode::DeleteRange) => (
                range_update(last[1].clone(), int_of(&last[2]) + 1, vec![b_elem.clone()]),
                true,
            ),
            Some(Opcode::UpdateRange) => {
                let mut fill = fill_of(&last[3]);
                fill.push(b_elem.clone());
                (range_update(last[1].clone(), int_of(&last[2]) + 1, fill), true)
            },
            _ => (
                vec![Value::Int(Opcode::UpdateAt.number()), Value::Int(index), b_elem.clone()],
                false,
            ),
        };

        let base = self.base_cost(parent, merged);
        let cost = base + segment_cost(&op);

        // a recursive edit of the element may beat replacing it outright
        let (edit_possible, edit_script) =
            delta(a_elem, &b_elem, cost.saturating_sub(EDIT_FRAMING_COST));
        if edit_possible {
            let edit_op =
                vec![Value::Int(Opcode::EditAt.number()), Value::Int(index), edit_script];
            let edit_cost = self.arena[parent].cost + segment_cost(&edit_op);
            if edit_cost < cost {
                return Step {
                    op: edit_op,
                    merged: false,
                    cost: edit_cost,
                    length: self.arena[parent].length,
                    index: index + 1,
                };
            }
        }

        Step { op, merged, cost, length: self.arena[parent].length, index: index + 1 }
    }

    fn insert_element(&self, parent: usize, index: i64, last_op: Option<Opcode>) -> Step {
        let b_elem = self.b[index as usize].clone();
        let last = &self.arena[parent].op;

        // a delete followed by an insert is not merged here: a change
        // covering both is generated as its own successor anyway
        let (op, merged) = match last_op {
            Some(Opcode::UpdateAt) => (
                range_update(last[1].clone(), index, vec![last[2].clone(), b_elem]),
                true,
            ),
            Some(Opcode::InsertAt) => (
                range_update(Value::Int(index - 1), index - 1, vec![last[2].clone(), b_elem]),
                true,
            ),
            Some(Opcode::UpdateRange) => {
                let mut fill = fill_of(&last[3]);
                fill.push(b_elem);
                (range_update(last[1].clone(), int_of(&last[2]), fill), true)
            },
            _ => (
                vec![Value::Int(Opcode::InsertAt.number()), Value::Int(index), b_elem],
                false,
            ),
        };

        let cost = self.base_cost(parent, merged) + segment_cost(&op);
        Step { op, merged, cost, length: self.arena[parent].length + 1, index: index + 1 }
    }

    fn delete_element(&self, parent: usize, index: i64, last_op: Option<Opcode>) -> Step {
        let last = &self.arena[parent].op;

        let (op, merged) = match last_op {
            Some(Opcode::UpdateAt) => (
                range_update(Value::Int(index - 1), index + 1, vec![last[2].clone()]),
                true,
            ),
            Some(Opcode::DeleteAt) => (
                vec![
                    Value::Int(Opcode::DeleteRange.number()),
                    Value::Int(index),
                    Value::Int(index + 2),
                ],
                true,
            ),
            Some(Opcode::DeleteRange) => (
                vec![
                    Value::Int(Opcode::DeleteRange.number()),
                    last[1].clone(),
                    Value::Int(int_of(&last[2]) + 1),
                ],
                true,
            ),
            Some(Opcode::UpdateRange) => (
                range_update(last[1].clone(), int_of(&last[2]) + 1, fill_of(&last[3])),
                true,
            ),
            _ => (vec![Value::Int(Opcode::DeleteAt.number()), Value::Int(index)], false),
        };

        let cost = self.base_cost(parent, merged) + segment_cost(&op);
        Step { op, merged, cost, length: self.arena[parent].length - 1, index }
    }

    fn assemble(&self, goal: usize) -> Value {
        let mut segments = Vec::new();
        let mut at = Some(goal);
        while let Some(i) = at {
            segments.push(&self.arena[i].op);
            at = self.arena[i].prev;
        }

        let mut script = Vec::new();
        for segment in segments.into_iter().rev() {
            script.extend(segment.iter().cloned());
        }
        Value::array(script)
    }
}

fn pending_opcode(op: &[Value]) -> Option<Opcode> {
    op.first().and_then(Value::as_i64).and_then(Opcode::from_number)
}

fn range_update(from: Value, to: i64, fill: Vec<Value>) -> Vec<Value> {
    vec![
        Value::Int(Opcode::UpdateRange.number()),
        from,
        Value::Int(to),
        Value::array(fill),
    ]
}

fn int_of(v: &Value) -> i64 {
    v.as_i64().unwrap_or(0)
}

fn fill_of(v: &Value) -> Vec<Value> {
    v.as_array().map(<[Value]>::to_vec).unwrap_or_default()
}

/// Objects do not need a search: keys are matched by name. Keys only in
/// `a` are deleted, keys only in `b` inserted, and changed shared keys
/// either edited recursively or replaced, whichever is smaller.
fn object_delta(
    a: &IndexMap<String, Value>,
    b: &IndexMap<String, Value>,
    max_size: usize,
) -> Option<Value> {
    let mut a_keys: Vec<&String> = a.keys().collect();
    let mut b_keys: Vec<&String> = b.keys().collect();
    a_keys.sort();
    b_keys.sort();

    let mut script: Vec<Value> = Vec::new();
    let mut size = 2usize;
    let mut emit = |script: &mut Vec<Value>, size: &mut usize, ops: Vec<Value>| {
        for op in ops {
            *size += op.serialized_size() + usize::from(!script.is_empty());
            script.push(op);
        }
    };

    let (mut pa, mut pb) = (0usize, 0usize);
    while (pa != a_keys.len() || pb != b_keys.len()) && size < max_size {
        if pb == b_keys.len() || (pa != a_keys.len() && a_keys[pa] < b_keys[pb]) {
            emit(
                &mut script,
                &mut size,
                vec![
                    Value::Int(Opcode::DeleteAt.number()),
                    Value::from(a_keys[pa].as_str()),
                ],
            );
            pa += 1;
        } else if pa == a_keys.len() || (pb != b_keys.len() && b_keys[pb] < a_keys[pa]) {
            emit(
                &mut script,
                &mut size,
                vec![
                    Value::Int(Opcode::InsertAt.number()),
                    Value::from(b_keys[pb].as_str()),
                    b[b_keys[pb]].clone(),
                ],
            );
            pb += 1;
        } else {
            let key = a_keys[pa];
            let a_elem = &a[key];
            let b_elem = &b[key];

            if a_elem != b_elem {
                let (edit_possible, edit_script) =
                    delta(a_elem, b_elem, max_size.saturating_sub(size));

                // use the recursive edit when possible and shorter
                if edit_possible && edit_script.serialized_size() < b_elem.serialized_size() {
                    emit(
                        &mut script,
                        &mut size,
                        vec![
                            Value::Int(Opcode::EditAt.number()),
                            Value::from(key.as_str()),
                            edit_script,
                        ],
                    );
                } else {
                    emit(
                        &mut script,
                        &mut size,
                        vec![
                            Value::Int(Opcode::UpdateAt.number()),
                            Value::from(key.as_str()),
                            b_elem.clone(),
                        ],
                    );
                }
            }

            pa += 1;
            pb += 1;
        }
    }

    let complete = pa == a_keys.len() && pb == b_keys.len();
    (complete && size <= max_size).then(|| Value::array(script))
}
