//! End-to-end execution tests driving the public API.

use pinion::{CollectStringPrint, Config, Context};

fn context_with_output() -> (Context, std::rc::Rc<std::cell::RefCell<String>>) {
    let print = CollectStringPrint::new();
    let output = print.handle();
    let ctx = Context::new(Config {
        print: Box::new(print),
        ..Config::default()
    })
    .expect("context creation");
    (ctx, output)
}

fn run(src: &str) -> String {
    let (mut ctx, output) = context_with_output();
    let program = ctx.compile(src, "__main__").expect("compile");
    ctx.invoke(program, &[], &[]).expect("run");
    let result = output.borrow().clone();
    result
}

#[test]
fn arithmetic() {
    assert_eq!(run("print(2 + 3 * 4)"), "14\n");
    assert_eq!(run("print(7 / 2)"), "3.5\n");
    assert_eq!(run("print(10 // 3, 10 % 3)"), "3 1\n");
    assert_eq!(run("print(-7 // 2, -7 % 2)"), "-4 1\n");
    assert_eq!(run("print(7 % -2)"), "-1\n");
    assert_eq!(run("print(2 ** 10)"), "1024\n");
    assert_eq!(run("print(-2 ** 2)"), "-4\n");
    assert_eq!(run("print(2 ** -1)"), "0.5\n");
}

#[test]
fn integer_wraparound() {
    assert_eq!(
        run("print(9223372036854775807 + 1)"),
        "-9223372036854775808\n"
    );
}

#[test]
fn shifts() {
    assert_eq!(run("print(1 << 4, 256 >> 4)"), "16 16\n");
    assert_eq!(run("print(1 << 100)"), "0\n");
    assert_eq!(run("print(-8 >> 100)"), "-1\n");
    assert_eq!(
        run("try: 1 << -1\nexcept ValueError: print('negative')"),
        "negative\n"
    );
}

#[test]
fn division_by_zero() {
    assert_eq!(
        run("try: 1 / 0\nexcept ZeroDivisionError: print('zero')"),
        "zero\n"
    );
    assert_eq!(
        run("try: 1 // 0\nexcept ZeroDivisionError: print('zero')"),
        "zero\n"
    );
}

#[test]
fn strings() {
    assert_eq!(run("print('a' + 'b', 'ab' * 3)"), "ab ababab\n");
    assert_eq!(run("s = 'hello'\nprint(s[0], s[-1], s[1:4])"), "h o ell\n");
    assert_eq!(run("print('hello'[::-1])"), "olleh\n");
    assert_eq!(run("print(len('hello'))"), "5\n");
    assert_eq!(run("print('a,b,,c'.split(','))"), "['a', 'b', '', 'c']\n");
    assert_eq!(run("print('-'.join(['a', 'b', 'c']))"), "a-b-c\n");
    assert_eq!(run("print('  x  '.strip())"), "x\n");
    assert_eq!(run("print('hello'.replace('l', 'L'))"), "heLLo\n");
    assert_eq!(run("print('hello'.find('llo'), 'hello'.find('z'))"), "2 -1\n");
    assert_eq!(run("print('aBc'.upper(), 'aBc'.lower())"), "ABC abc\n");
    assert_eq!(
        run("print('hi'.startswith('h'), 'hi'.endswith('o'))"),
        "True False\n"
    );
}

#[test]
fn string_format() {
    assert_eq!(run("print('{} and {}'.format(1, 'x'))"), "1 and x\n");
    assert_eq!(run("print('{1}-{0}'.format('a', 'b'))"), "b-a\n");
    assert_eq!(run("print('{{x}}'.format())"), "{x}\n");
    assert_eq!(
        run("try: '{} {0}'.format(1)\nexcept ValueError: print('mixed')"),
        "mixed\n"
    );
}

#[test]
fn containers() {
    assert_eq!(run("print([1, 'x', (2,)])"), "[1, 'x', (2,)]\n");
    assert_eq!(run("print({'a': 1, 'b': 2})"), "{'a': 1, 'b': 2}\n");
    assert_eq!(run("l = [1, 2]\nl.append(3)\nprint(l, len(l))"), "[1, 2, 3] 3\n");
    assert_eq!(run("l = [1, 2, 3, 4]\nprint(l[1:3], l[-1])"), "[2, 3] 4\n");
    assert_eq!(run("l = [1, 2, 3, 4]\nl[1:3] = [9]\nprint(l)"), "[1, 9, 4]\n");
    assert_eq!(run("l = [1]\nl[0] += 5\nprint(l[0])"), "6\n");
    assert_eq!(run("t = (1, 2, 2)\nprint(t.count(2), t.index(2))"), "2 1\n");
}

#[test]
fn list_methods() {
    assert_eq!(
        run("l = [3, 1]\nl.extend((2,))\nl.insert(0, 0)\nprint(l)"),
        "[0, 3, 1, 2]\n"
    );
    assert_eq!(run("l = [1, 2, 3]\nprint(l.pop(), l)"), "3 [1, 2]\n");
    assert_eq!(run("l = [1, 2, 1]\nl.remove(1)\nprint(l)"), "[2, 1]\n");
    assert_eq!(run("l = [1, 2]\nl.reverse()\nprint(l)"), "[2, 1]\n");
    assert_eq!(run("l = [2, 1]\nl.clear()\nprint(l)"), "[]\n");
    assert_eq!(run("print([10, 20].index(20))"), "1\n");
}

#[test]
fn sorting() {
    assert_eq!(run("print(sorted([3, 1, 2]))"), "[1, 2, 3]\n");
    assert_eq!(
        run("print(sorted(['bb', 'a', 'ccc'], key=len))"),
        "['a', 'bb', 'ccc']\n"
    );
    assert_eq!(
        run("print(sorted([1, 3, 2], reverse=True))"),
        "[3, 2, 1]\n"
    );
    // Stability: equal keys keep their original order.
    assert_eq!(
        run("pairs = [(1, 'a'), (0, 'b'), (1, 'c')]\nprint(sorted(pairs, key=lambda p: p[0]))"),
        "[(0, 'b'), (1, 'a'), (1, 'c')]\n"
    );
    assert_eq!(
        run("class C:\n    pass\ntry: sorted([C(), C()])\nexcept TypeError: print('unordered')"),
        "unordered\n"
    );
}

#[test]
fn dicts() {
    assert_eq!(
        run("d = {'a': 1}\nd['b'] = 2\nprint(d['a'], d.get('c', 9), len(d))"),
        "1 9 2\n"
    );
    assert_eq!(run("d = {'a': 1, 'b': 2}\nprint(d.pop('a'), len(d))"), "1 1\n");
    assert_eq!(
        run("d = {'a': 1}\nd.update({'b': 2})\nfor k in d: print(k)"),
        "a\nb\n"
    );
    assert_eq!(
        run("d = {'x': 1, 'y': 2}\nprint(list(d.keys()), list(d.values()))"),
        "['x', 'y'] [1, 2]\n"
    );
    assert_eq!(
        run("d = {'x': 1}\nfor k, v in d.items(): print(k, v)"),
        "x 1\n"
    );
    // bool and int keys collide like equal numbers do.
    assert_eq!(run("d = {}\nd[1] = 'one'\nd[True] = 'yes'\nprint(len(d), d[1])"), "1 yes\n");
    assert_eq!(
        run("d = {}\ntry: d['missing']\nexcept KeyError: print('missing')"),
        "missing\n"
    );
}

#[test]
fn sets() {
    assert_eq!(
        run("s = {1, 2}\ns.add(3)\ns.add(2)\nprint(len(s), 3 in s)"),
        "3 True\n"
    );
    assert_eq!(run("s = {1}\ns.discard(2)\ns.remove(1)\nprint(len(s))"), "0\n");
    assert_eq!(
        run("s = set()\ntry: s.remove(1)\nexcept KeyError: print('gone')"),
        "gone\n"
    );
}

#[test]
fn dict_mutation_during_iteration() {
    assert_eq!(
        run("d = {'a': 1}\ntry:\n    for k in d:\n        d['b'] = 2\nexcept RuntimeError: print('changed')"),
        "changed\n"
    );
    assert_eq!(
        run("s = {1}\ntry:\n    for v in s:\n        s.add(2)\nexcept RuntimeError: print('changed')"),
        "changed\n"
    );
}

#[test]
fn control_flow() {
    assert_eq!(
        run("x = 3\nif x > 2:\n    print('big')\nelif x > 1:\n    print('mid')\nelse:\n    print('small')"),
        "big\n"
    );
    assert_eq!(
        run("x = 2\nif x > 2: print('big')\nelif x > 1: print('mid')\nelse: print('small')"),
        "mid\n"
    );
    assert_eq!(run("n = 0\nwhile n < 3:\n    n += 1\nprint(n)"), "3\n");
    assert_eq!(
        run("for i in range(5):\n    if i == 2: continue\n    if i == 4: break\n    print(i)"),
        "0\n1\n3\n"
    );
}

#[test]
fn loop_else_clauses() {
    assert_eq!(
        run("for i in range(2):\n    pass\nelse:\n    print('done')"),
        "done\n"
    );
    assert_eq!(
        run("for i in range(5):\n    if i == 1: break\nelse:\n    print('done')\nprint('after')"),
        "after\n"
    );
    assert_eq!(
        run("n = 0\nwhile n < 2:\n    n += 1\nelse:\n    print('out')"),
        "out\n"
    );
    assert_eq!(
        run("while True:\n    break\nelse:\n    print('never')\nprint('after')"),
        "after\n"
    );
}

#[test]
fn tuple_unpacking() {
    assert_eq!(run("a, b = 1, 2\nprint(a, b)"), "1 2\n");
    assert_eq!(run("a, b = b, a = 1, 2\nprint(a, b)"), "1 2\n");
    assert_eq!(
        run("for i, v in enumerate(['x', 'y']):\n    print(i, v)"),
        "0 x\n1 y\n"
    );
    assert_eq!(
        run("try:\n    a, b = [1, 2, 3]\nexcept ValueError: print('shape')"),
        "shape\n"
    );
}

#[test]
fn builtin_functions() {
    assert_eq!(run("print(abs(-3), abs(2.5))"), "3 2.5\n");
    assert_eq!(run("print(min(3, 1, 2), max([4, 9]))"), "1 9\n");
    assert_eq!(run("print(min([], default=7))"), "7\n");
    assert_eq!(run("print(sum(range(5)), sum([1, 2], 10))"), "10 13\n");
    assert_eq!(run("print(any([0, '', 3]), all([1, 2]))"), "True True\n");
    assert_eq!(run("print(divmod(7, 2))"), "(3, 1)\n");
    assert_eq!(run("print(pow(3, 4))"), "81\n");
    assert_eq!(run("print(list(zip([1, 2], 'ab')))"), "[(1, 'a'), (2, 'b')]\n");
    assert_eq!(run("print(list(map(lambda x: x * 2, [1, 2, 3])))"), "[2, 4, 6]\n");
    assert_eq!(
        run("print(list(filter(lambda x: x % 2, range(6))))"),
        "[1, 3, 5]\n"
    );
    assert_eq!(run("print(list(reversed([1, 2, 3])))"), "[3, 2, 1]\n");
    assert_eq!(run("print(list(range(3)), list(range(5, 1, -2)))"), "[0, 1, 2] [5, 3]\n");
    assert_eq!(run("print(hash(1) == hash(1))"), "True\n");
    assert_eq!(run("print(repr('x'))"), "'x'\n");
    assert_eq!(run("print(int('42') + 1, float('2.5'))"), "43 2.5\n");
    assert_eq!(run("print(str(42), bool([]), bool(3))"), "42 False True\n");
    assert_eq!(run("print(hasattr([], 'append'), hasattr([], 'nope'))"), "True False\n");
}

#[test]
fn short_circuit_returns_deciding_operand() {
    assert_eq!(run("print(0 or 'x')"), "x\n");
    assert_eq!(run("print(1 and 2)"), "2\n");
    assert_eq!(run("print('' or [])"), "[]\n");
    assert_eq!(run("print(0 and nonexistent)"), "0\n");
}

#[test]
fn identity_and_membership() {
    assert_eq!(run("print(None is None, 1 is 1)"), "True True\n");
    assert_eq!(run("print([] is [], 1 is not 2)"), "False True\n");
    assert_eq!(run("print(2 in [1, 2], 3 not in (1, 2))"), "True True\n");
    assert_eq!(run("print('ell' in 'hello')"), "True\n");
    assert_eq!(run("print('a' in {'a': 1}, 2 in {1, 2})"), "True True\n");
}

#[test]
fn ternary() {
    assert_eq!(run("print('yes' if 1 else 'no')"), "yes\n");
    assert_eq!(run("print('yes' if [] else 'no')"), "no\n");
}

#[test]
fn comprehension() {
    assert_eq!(run("print([x * 2 for x in range(4)])"), "[0, 2, 4, 6]\n");
    assert_eq!(
        run("items = ['a', 'bb']\nprint([len(s) for s in items])"),
        "[1, 2]\n"
    );
}

#[test]
fn closures_capture_mutable_cells() {
    assert_eq!(
        run("def mk():\n    x = 0\n    def inc(): nonlocal x; x += 1; return x\n    return inc\nf = mk()\nprint(f(), f(), f())"),
        "1 2 3\n"
    );
    // Two closures from separate calls get separate cells.
    assert_eq!(
        run("def mk():\n    x = 0\n    def inc(): nonlocal x; x += 1; return x\n    return inc\na = mk()\nb = mk()\nprint(a(), a(), b())"),
        "1 2 1\n"
    );
}

#[test]
fn global_declaration() {
    assert_eq!(
        run("g = 1\ndef bump():\n    global g\n    g = g + 1\nbump()\nbump()\nprint(g)"),
        "3\n"
    );
}

#[test]
fn functions_defaults_and_variadics() {
    assert_eq!(
        run("def f(a, b=10):\n    return a + b\nprint(f(1), f(1, 2))"),
        "11 3\n"
    );
    assert_eq!(
        run("def f(*args):\n    return len(args)\nprint(f(), f(1, 2, 3))"),
        "0 3\n"
    );
    assert_eq!(
        run("def f(a, **kw):\n    return a + kw.get('b', 0)\nprint(f(1), f(1, b=5))"),
        "1 6\n"
    );
    assert_eq!(
        run("def f(a, b):\n    return a - b\nprint(f(b=1, a=3))"),
        "2\n"
    );
    assert_eq!(
        run("def f(a, b):\n    return a - b\nargs = (5, 2)\nprint(f(*args))"),
        "3\n"
    );
    assert_eq!(
        run("def f(a, b):\n    return a - b\nkw = {'a': 5, 'b': 2}\nprint(f(**kw))"),
        "3\n"
    );
}

#[test]
fn call_errors() {
    assert_eq!(
        run("def f(a):\n    return a\ntry: f()\nexcept TypeError: print('missing')"),
        "missing\n"
    );
    assert_eq!(
        run("def f(a):\n    return a\ntry: f(1, 2)\nexcept TypeError: print('extra')"),
        "extra\n"
    );
    assert_eq!(
        run("def f(a):\n    return a\ntry: f(1, a=2)\nexcept TypeError: print('dup')"),
        "dup\n"
    );
    assert_eq!(
        run("def f(a):\n    return a\ntry: f(b=1)\nexcept TypeError: print('unknown')"),
        "unknown\n"
    );
    assert_eq!(
        run("try: (3)(1)\nexcept TypeError: print('not callable')"),
        "not callable\n"
    );
}

#[test]
fn recursion_limit() {
    assert_eq!(
        run("def f():\n    return f()\ntry: f()\nexcept RecursionError: print('deep')"),
        "deep\n"
    );
}

#[test]
fn with_statement() {
    let src = "\
class Mgr:
    def __enter__(self): print('enter'); return 42
    def __exit__(self, a, b, c): print('exit')
with Mgr() as v:
    print(v)
";
    assert_eq!(run(src), "enter\n42\nexit\n");
}

#[test]
fn with_runs_exit_on_exception() {
    let src = "\
class Mgr:
    def __enter__(self): return self
    def __exit__(self, a, b, c): print('exit')
try:
    with Mgr():
        raise ValueError('boom')
except ValueError as e:
    print('caught', e)
";
    assert_eq!(run(src), "exit\ncaught boom\n");
}

#[test]
fn repr_handles_cycles() {
    assert_eq!(run("l = [1]\nl.append(l)\nprint(l)"), "[1, [...]]\n");
}

#[test]
fn print_keywords() {
    assert_eq!(run("print(1, 2, sep='-', end='!')"), "1-2!");
    assert_eq!(run("print()"), "\n");
}

#[test]
fn division_identity_holds() {
    // a == (a // b) * b + a % b across sign combinations.
    let src = "\
ok = True
for a in [13, -13, 7, -7, 0]:
    for b in [3, -3, 5, -5]:
        if a != (a // b) * b + a % b:
            ok = False
        if b > 0 and not (0 <= a % b and a % b < b):
            ok = False
print(ok)
";
    assert_eq!(run(src), "True\n");
}

#[test]
fn string_length_scales_with_repetition() {
    assert_eq!(
        run("s = 'abc'\nprint(len(s * 0), len(s * 4) == len(s) * 4)"),
        "0 True\n"
    );
}

#[test]
fn list_round_trips_through_its_iterator() {
    assert_eq!(run("l = [1, 'two', (3,)]\nprint(list(iter(l)) == l)"), "True\n");
}

#[test]
fn file_objects() {
    let dir = std::env::temp_dir().join(format!("pinion_file_test_{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("notes.txt");
    let path_str = path.to_str().expect("utf-8 path").replace('\\', "/");

    let src = format!(
        "f = open('{path_str}', 'w')\nf.write('alpha\\n')\nf.write('beta\\n')\nf.close()\ng = open('{path_str}')\nfor line in g:\n    print(line.strip())\ng.close()"
    );
    assert_eq!(run(&src), "alpha\nbeta\n");

    let src = format!("h = open('{path_str}')\nprint(h.read().strip())\nh.close()");
    assert_eq!(run(&src), "alpha\nbeta\n");

    assert_eq!(
        run("try: open('/nonexistent/pinion/file')\nexcept OSError: print('no file')"),
        "no file\n"
    );
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn hashable_and_unhashable_keys() {
    let src = "\
d = {}
d[(1, 2)] = 3
try:
    d[[1, 2]] = 4
except TypeError:
    print('ok')
print(d[(1, 2)])
";
    assert_eq!(run(src), "ok\n3\n");
    assert_eq!(
        run("s = set()\ntry: s.add({})\nexcept TypeError: print('unhashable')"),
        "unhashable\n"
    );
}

#[test]
fn native_free_functions() {
    assert_eq!(run("print(chr(65), ord('a'))"), "A 97\n");
    assert_eq!(
        run("try: ord('')\nexcept ValueError: print('empty')"),
        "empty\n"
    );
    assert_eq!(
        run("try: chr(-1)\nexcept ValueError: print('range')"),
        "range\n"
    );
    assert_eq!(run("print(bin(10), oct(8), hex(255))"), "0b1010 0o10 0xff\n");
    assert_eq!(run("print(bin(0), hex(-255))"), "0b0 -0xff\n");
    assert_eq!(
        run("class B:\n    pass\nprint(callable(print), callable(3), callable(B))"),
        "True False True\n"
    );
    assert_eq!(
        run("class A:\n    def __call__(self): return 1\nprint(callable(A()))"),
        "True\n"
    );
    assert_eq!(run("l = []\nprint(id(l) == id(l), id([]) == id(l))"), "True False\n");
    assert_eq!(
        run("class B:\n    pass\nb = B()\nsetattr(b, 'x', 7)\nprint(getattr(b, 'x'))"),
        "7\n"
    );
}

#[test]
fn eval_exec_compile() {
    assert_eq!(run("print(eval('1 + 2'))"), "3\n");
    assert_eq!(run("exec('xx = 9')\nprint(xx)"), "9\n");
    assert_eq!(
        run("c = compile('40 + 2', '<c>', 'eval')\nprint(eval(c))"),
        "42\n"
    );
    assert_eq!(
        run("c = compile('print(\"ran\")', '<c>', 'exec')\nexec(c)"),
        "ran\n"
    );
    assert_eq!(
        run("try: compile('1', '<c>', 'single')\nexcept ValueError: print('mode')"),
        "mode\n"
    );
    assert_eq!(
        run("try: eval('1 +')\nexcept SyntaxError: print('bad')"),
        "bad\n"
    );
}

#[test]
fn str_case_pad_and_search_methods() {
    assert_eq!(run("print('hello world'.capitalize())"), "Hello world\n");
    assert_eq!(run("print('ABC'.casefold())"), "abc\n");
    assert_eq!(run("print('ab'.center(6, '-'))"), "--ab--\n");
    assert_eq!(run("print('ab'.ljust(4, '.') + '|' + 'ab'.rjust(4, '.'))"), "ab..|..ab\n");
    assert_eq!(run("print('42'.zfill(5), '-42'.zfill(5))"), "00042 -0042\n");
    assert_eq!(run("print('  hi  '.lstrip() + '|' + '  hi  '.rstrip())"), "hi  |  hi\n");
    assert_eq!(run("print('a\\nb\\r\\nc'.splitlines())"), "['a', 'b', 'c']\n");
    assert_eq!(run("print('banana'.count('an'), 'banana'.rfind('an'))"), "2 3\n");
    assert_eq!(run("print('banana'.index('n'), 'banana'.rindex('n'))"), "2 4\n");
    assert_eq!(
        run("try: 'x'.index('y')\nexcept ValueError: print('missing')"),
        "missing\n"
    );
}

#[test]
fn str_predicates() {
    assert_eq!(
        run("print('abc'.isalpha(), '123'.isdigit(), 'a1'.isalnum())"),
        "True True True\n"
    );
    assert_eq!(
        run("print(' '.isspace(), 'abc'.islower(), 'ABC'.isupper())"),
        "True True True\n"
    );
    assert_eq!(
        run("print('_x1'.isidentifier(), '2x'.isidentifier())"),
        "True False\n"
    );
    assert_eq!(run("print('abc'.isascii(), 'caf\\u00e9'.isascii())"), "True False\n");
    assert_eq!(run("print(''.isalpha(), ''.isascii())"), "False True\n");
    assert_eq!(run("print('ab\\ncd'.isprintable(), 'abcd'.isprintable())"), "False True\n");
    assert_eq!(run("print('123'.isdecimal(), '123'.isnumeric())"), "True True\n");
}

#[test]
fn int_and_float_methods() {
    assert_eq!(run("print((10).bit_length(), (0).bit_length())"), "4 0\n");
    assert_eq!(run("print((255).bit_count(), (-1).bit_count())"), "8 64\n");
    assert_eq!(run("print((4.0).is_integer(), (2.5).is_integer())"), "True False\n");
}

#[test]
fn set_algebra() {
    assert_eq!(
        run("a = {1, 2, 3}\nb = {2, 3, 4}\nprint(sorted(a.union(b)), sorted(a.intersection(b)))"),
        "[1, 2, 3, 4] [2, 3]\n"
    );
    assert_eq!(
        run("a = {1, 2, 3}\nb = {2, 3, 4}\nprint(sorted(a.difference(b)), sorted(a.symmetric_difference(b)))"),
        "[1] [1, 4]\n"
    );
    assert_eq!(
        run("print({1, 2}.issubset({1, 2, 3}), {1, 2}.issuperset({1}), {1}.isdisjoint({2}))"),
        "True True True\n"
    );
    assert_eq!(
        run("print({1, 2}.issubset({1}), {1}.isdisjoint({1}))"),
        "False False\n"
    );
    assert_eq!(
        run("s = {1}\ns.update([2, 3])\nc = s.copy()\nc.add(4)\nprint(len(s), len(c))"),
        "3 4\n"
    );
}

#[test]
fn dict_and_list_copy_methods() {
    assert_eq!(
        run("d = {'a': 1}\nprint(d.setdefault('a', 9), d.setdefault('b', 2), d['b'])"),
        "1 2 2\n"
    );
    assert_eq!(run("d = {'a': 1, 'b': 2}\nprint(d.popitem(), len(d))"), "('b', 2) 1\n");
    assert_eq!(
        run("d = {}\ntry: d.popitem()\nexcept KeyError: print('empty')"),
        "empty\n"
    );
    assert_eq!(
        run("d = {'a': 1}\nc = d.copy()\nc['z'] = 2\nprint(len(d), len(c))"),
        "1 2\n"
    );
    assert_eq!(run("l = [1]\nc = l.copy()\nc.append(2)\nprint(l, c)"), "[1] [1, 2]\n");
}
