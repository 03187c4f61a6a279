//! Collector behavior observable through the embedding surface.

use std::cell::Cell;
use std::rc::Rc;

use pinion::{Config, Context, ExcType};

fn context() -> Context {
    Context::new(Config::default()).expect("context creation")
}

#[test]
fn unreachable_cycles_are_collected() {
    let mut ctx = context();
    ctx.collect_garbage();
    let baseline = ctx.live_objects();

    let program = ctx
        .compile("a = []\na.append(a)\nb = {}\nb['self'] = b\na = None\nb = None", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    ctx.collect_garbage();

    // The cycle and the scratch objects are gone; only the two global
    // cells (now holding None) and interned leftovers may remain.
    assert!(
        ctx.live_objects() <= baseline + 4,
        "live {} vs baseline {}",
        ctx.live_objects(),
        baseline
    );
}

#[test]
fn protect_pins_values_across_collections() {
    let mut ctx = context();
    let s = ctx.str_value("pinned").expect("alloc");
    ctx.protect(s);
    ctx.collect_garbage();
    assert_eq!(ctx.as_str(s).as_deref(), Some("pinned"));

    let before = ctx.live_objects();
    ctx.unprotect(s);
    ctx.collect_garbage();
    assert!(ctx.live_objects() < before);
}

#[test]
fn finalizers_run_when_objects_die() {
    let mut ctx = context();
    let ran = Rc::new(Cell::new(false));
    let list = ctx.new_list(&[]).expect("alloc");
    let flag = ran.clone();
    ctx.set_finalizer(list, Box::new(move || flag.set(true)));

    ctx.protect(list);
    ctx.collect_garbage();
    assert!(!ran.get());

    ctx.unprotect(list);
    ctx.collect_garbage();
    assert!(ran.get());
}

#[test]
fn finalizers_run_at_teardown() {
    let ran = Rc::new(Cell::new(false));
    {
        let mut ctx = context();
        let list = ctx.new_list(&[]).expect("alloc");
        let flag = ran.clone();
        ctx.set_finalizer(list, Box::new(move || flag.set(true)));
        ctx.protect(list);
    }
    assert!(ran.get());
}

#[test]
fn globals_survive_collections() {
    let mut ctx = context();
    let program = ctx
        .compile("words = ['keep', 'these']", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    ctx.collect_garbage();
    ctx.collect_garbage();
    let check = ctx
        .compile("print_target = words[0] + words[1]", "__main__")
        .expect("compile");
    ctx.invoke(check, &[], &[]).expect("run");
    let v = ctx.get_global("__main__", "print_target").expect("global");
    assert_eq!(ctx.as_str(v).as_deref(), Some("keepthese"));
}

#[test]
fn allocation_cap_raises_the_preallocated_memory_error() {
    // Measure a bootstrapped context, then build one with just enough
    // headroom that user code runs out quickly.
    let baseline = {
        let mut ctx = context();
        ctx.collect_garbage();
        ctx.live_objects()
    };
    let mut ctx = Context::new(Config {
        max_alloc: Some(baseline + 60),
        ..Config::default()
    })
    .expect("context creation");
    let program = ctx
        .compile("x = []\nwhile True:\n    x.append([1])", "__main__")
        .expect("compile");
    let exc = ctx.invoke(program, &[], &[]).expect_err("expected OOM");
    assert_eq!(exc.kind(), Some(ExcType::MemoryError));
}

#[test]
fn collections_triggered_by_allocation_keep_live_data() {
    let mut ctx = context();
    // Churn through far more garbage than the trigger threshold while
    // keeping one accumulating list live.
    let program = ctx
        .compile(
            "keep = []\nfor i in range(500):\n    tmp = [i, [i], {'i': i}]\n    keep.append(i)\nprint_len = len(keep)",
            "__main__",
        )
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let v = ctx.get_global("__main__", "print_len").expect("global");
    assert_eq!(ctx.as_int(v), Some(500));
}
