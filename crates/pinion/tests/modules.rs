//! Import machinery: native loaders, source modules, and the shipped
//! `random` and `sys` modules.

use pinion::{CollectStringPrint, Config, Context, ExcType};

fn run_with_config(src: &str, config: Config) -> (String, Context) {
    let print = CollectStringPrint::new();
    let output = print.handle();
    let mut ctx = Context::new(Config {
        print: Box::new(print),
        ..config
    })
    .expect("context creation");
    let program = ctx.compile(src, "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let result = output.borrow().clone();
    (result, ctx)
}

fn run(src: &str) -> String {
    run_with_config(src, Config::default()).0
}

#[test]
fn random_module() {
    let out = run(
        "import random\nrandom.seed(7)\nv = random.random()\nprint(0.0 <= v, v < 1.0)\nn = random.randint(3, 5)\nprint(3 <= n, n <= 5)",
    );
    assert_eq!(out, "True True\nTrue True\n");
}

#[test]
fn random_blob_helpers() {
    let out = run(
        "import random\nc = random.choice(range(10))\nprint(0 <= c, c < 10)\nr = random.randrange(5)\nprint(0 <= r, r < 5)\nb = random.getrandbits(4)\nprint(0 <= b, b < 16)",
    );
    assert_eq!(out, "True True\nTrue True\nTrue True\n");
}

#[test]
fn random_seed_is_reproducible() {
    let out = run(
        "import random\nrandom.seed(42)\na = random.random()\nrandom.seed(42)\nb = random.random()\nprint(a == b)",
    );
    assert_eq!(out, "True\n");
}

#[test]
fn sys_module() {
    let config = Config {
        argv: vec!["prog".to_string(), "arg1".to_string()],
        ..Config::default()
    };
    let (out, _ctx) = run_with_config("import sys\nprint(sys.argv[0], sys.argv[1])", config);
    assert_eq!(out, "prog arg1\n");
}

#[test]
fn sys_exit_unwinds_to_the_host() {
    let mut ctx = Context::new(Config::default()).expect("context creation");
    let program = ctx
        .compile("import sys\nsys.exit()", "__main__")
        .expect("compile");
    let exc = ctx.invoke(program, &[], &[]).expect_err("expected exit");
    assert!(exc.is_system_exit());
}

#[test]
fn source_module_import() {
    let dir = std::env::temp_dir().join(format!("pinion_mod_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(
        dir.join("helpers.py"),
        "base = 41\ndef plus(x):\n    return base + x\n",
    )
    .expect("write module");

    let config = Config {
        import_path: dir.clone(),
        ..Config::default()
    };
    let (out, _ctx) = run_with_config(
        "import helpers\nprint(helpers.base)\nfrom helpers import plus\nprint(plus(1))\nimport helpers as h\nprint(h.base)",
        config,
    );
    assert_eq!(out, "41\n42\n41\n");
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn missing_module_is_an_import_error() {
    let out = run("try:\n    import nowhere\nexcept ImportError: print('missing')");
    assert_eq!(out, "missing\n");
}

#[test]
fn missing_symbol_is_an_import_error() {
    let out = run("try:\n    from sys import nothing\nexcept ImportError: print('missing')");
    assert_eq!(out, "missing\n");
}

#[test]
fn host_registered_native_module() {
    let print = CollectStringPrint::new();
    let output = print.handle();
    let mut ctx = Context::new(Config {
        print: Box::new(print),
        ..Config::default()
    })
    .expect("context creation");

    ctx.register_module("host", |ctx| {
        let answer = ctx.int_value(42);
        ctx.set_global("answer", answer)?;
        let double = ctx.new_function("double", |ctx, args| {
            let n = ctx.as_int(args[0]).unwrap_or(0);
            Ok(ctx.int_value(n * 2))
        })?;
        ctx.set_global("double", double)
    });

    let program = ctx
        .compile("import host\nprint(host.answer, host.double(21))", "__main__")
        .expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    assert_eq!(output.borrow().as_str(), "42 42\n");
}

#[test]
fn host_import_api() {
    let mut ctx = Context::new(Config::default()).expect("context creation");
    ctx.import_module("sys", Some("system")).expect("import");
    let module = ctx.get_global("__main__", "system").expect("bound module");
    let argv = ctx.get_attribute(module, "argv").expect("argv attr");
    assert!(ctx.as_str(argv).is_none());

    ctx.import_from_module("sys", "exit", None).expect("import from");
    assert!(ctx.get_global("__main__", "exit").is_some());

    let err = ctx
        .import_module("missing_module", None)
        .expect_err("missing module");
    assert_eq!(err.kind(), Some(ExcType::ImportError));
}

#[test]
fn failed_source_module_rolls_back_its_reservation() {
    let dir = std::env::temp_dir().join(format!("pinion_badmod_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    std::fs::write(dir.join("broken.py"), "raise ValueError('nope')\n").expect("write module");

    let config = Config {
        import_path: dir.clone(),
        ..Config::default()
    };
    let (out, _ctx) = run_with_config(
        "caught = 0\ntry:\n    import broken\nexcept ImportError:\n    caught = 1\ntry:\n    import broken\nexcept ImportError:\n    caught = caught + 1\nprint(caught)",
        config,
    );
    assert_eq!(out, "2\n");
    let _ = std::fs::remove_dir_all(dir);
}
