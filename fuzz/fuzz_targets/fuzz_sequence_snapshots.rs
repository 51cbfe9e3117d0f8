#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use timelens_runtime::{PropKey, ReadContext, Runtime, Snapshot, Target, Value, Wrapper};

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Splice { start: u8, delete: u8, items: Vec<i8> },
    Push(i8),
    Pop,
    Shift,
    Unshift(i8),
    Reverse,
    Set { index: u8, value: i8 },
    SetLen(u8),
    Snapshot,
    DropOldest,
}

/// `Null` padding maps to `i64::MIN`.
fn as_model(v: &Value) -> i64 {
    v.as_int().unwrap_or(i64::MIN)
}

fn apply(w: &Wrapper, model: &mut Vec<i64>, op: &FuzzOp) {
    match op {
        FuzzOp::Splice { start, delete, items } => {
            let items: Vec<i64> = items.iter().take(8).map(|&v| i64::from(v)).collect();
            let start = usize::from(*start);
            let delete = usize::from(*delete);
            let removed = w
                .splice(start, delete, items.iter().copied().map(Value::Int))
                .expect("splice on a sequence");
            let s = start.min(model.len());
            let e = s.saturating_add(delete).min(model.len());
            let expected: Vec<i64> = model.splice(s..e, items).collect();
            assert_eq!(removed.len(), expected.len());
        }
        FuzzOp::Push(v) => {
            w.push([Value::Int(i64::from(*v))]).expect("push");
            model.push(i64::from(*v));
        }
        FuzzOp::Pop => {
            let popped = w.pop().expect("pop");
            assert_eq!(popped.map(|v| as_model(&v)), model.pop());
        }
        FuzzOp::Shift => {
            let shifted = w.shift().expect("shift");
            let expected = (!model.is_empty()).then(|| model.remove(0));
            assert_eq!(shifted.map(|v| as_model(&v)), expected);
        }
        FuzzOp::Unshift(v) => {
            w.unshift([Value::Int(i64::from(*v))]).expect("unshift");
            model.insert(0, i64::from(*v));
        }
        FuzzOp::Reverse => {
            w.reverse().expect("reverse");
            model.reverse();
        }
        FuzzOp::Set { index, value } => {
            let index = usize::from(*index).min(model.len());
            w.set(PropKey::Index(index), i64::from(*value)).expect("set in range");
            if index == model.len() {
                model.push(i64::from(*value));
            } else {
                model[index] = i64::from(*value);
            }
        }
        FuzzOp::SetLen(n) => {
            let n = usize::from(*n % 32);
            w.set(PropKey::Length, n).expect("set length");
            model.resize(n, i64::MIN);
        }
        FuzzOp::Snapshot | FuzzOp::DropOldest => {}
    }
}

fn observed(rt: &Runtime, snapshot: Option<&Snapshot>, w: &Wrapper) -> Vec<i64> {
    let context = match snapshot {
        Some(s) => ReadContext::new().with_snapshot(s.clone()),
        None => ReadContext::new(),
    };
    rt.with_read_context(context, || w.to_vec())
        .expect("read")
        .into_iter()
        .map(|v| as_model(&v))
        .collect()
}

fuzz_target!(|input: (Vec<i8>, Vec<FuzzOp>)| {
    let (initial, ops) = input;
    let mut model: Vec<i64> = initial.iter().take(32).map(|&v| i64::from(v)).collect();
    let rt = Runtime::new();
    let w = rt.wrap(&Target::sequence(model.iter().copied().map(Value::Int)));
    let mut held: Vec<(Snapshot, Vec<i64>)> = Vec::new();

    for op in ops.iter().take(256) {
        match op {
            FuzzOp::Snapshot => held.push((rt.create_snapshot(), model.clone())),
            FuzzOp::DropOldest => {
                if !held.is_empty() {
                    held.remove(0);
                }
            }
            _ => apply(&w, &mut model, op),
        }
        if model.len() > 512 {
            break;
        }
    }
    rt.run_pending();

    assert_eq!(observed(&rt, None, &w), model);
    for (snapshot, expected) in &held {
        assert_eq!(&observed(&rt, Some(snapshot), &w), expected);
    }
});
