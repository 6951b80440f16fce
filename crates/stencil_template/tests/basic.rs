mod common;

use common::Fixture;

#[test]
fn parse_and_execute() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var t = new Template('test_template');
             t.parse('{{ .foo }}, {{ .bar }}');
             t.executeString({ foo: 'hello', bar: 'world' })"
        ),
        "hello, world"
    );
}

#[test]
fn chaining_methods_return_the_receiver() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var t = new Template('test_template');
             [t.parse('x') === t, t.delims('<<', '>>') === t, t.option('missingkey=zero') === t].join()"
        ),
        "true,true,true"
    );
}

#[test]
fn execute_named_template() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var t = new Template('test_template');
             t.parse('{{ define \"inner\" }}inner {{ .param }}{{ end }}');
             t.executeTemplateString('inner', { param: 'value' })"
        ),
        "inner value"
    );
}

#[test]
fn host_functions_are_callable_from_actions() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var t = new Template('test_template');
             t.funcs({ wrap: s => `pre-${s}-post` });
             t.parse('{{ wrap \"hello\" }} {{ .x | wrap }}');
             t.executeString({ x: 'piped' })"
        ),
        "pre-hello-post pre-piped-post"
    );
}

#[test]
fn funcs_undefined_values_are_skipped() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "var t = new Template('test_template');
             t.funcs({ f: counter('f', 'f'), skip: undefined });
             t.parse('{{ f }}').executeString()"
        ),
        "f"
    );
}

#[test]
fn funcs_overwrite_earlier_registrations() {
    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template');
         t.funcs({ f: counter('first', 'first') });
         t.parse('{{ f }}');
         t.funcs({ f: counter('second', 'second') });",
    );
    assert_eq!(fx.eval("t.executeString()"), "second");
    assert_eq!(fx.eval("[calls.first, calls.second].join()"), "0,1");
}

#[test]
fn clone_keeps_its_own_functions() {
    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template');
         t.funcs({ f: counter('f1', 'f1') });
         t.parse('{{ f }}');
         var c = t.clone();",
    );
    assert_eq!(fx.eval("c.executeString()"), "f1");
    assert_eq!(fx.eval("calls.f1"), "1");

    fx.eval("c.funcs({ f: counter('f2', 'f2') })");
    assert_eq!(fx.eval("t.executeString()"), "f1");
    assert_eq!(fx.eval("c.executeString()"), "f2");

    fx.eval("t.funcs({ f: counter('f2alt', 'f2alt') })");
    assert_eq!(fx.eval("c.executeString()"), "f2");
    assert_eq!(fx.eval("t.executeString()"), "f2alt");

    assert_eq!(fx.eval("[calls.f1, calls.f2, calls.f2alt].join()"), "2,2,1");
}

#[test]
fn defined_templates() {
    let fx = Fixture::load();
    assert_eq!(fx.eval("var t = new Template('test_template'); t.definedTemplates()"), "");
    assert_eq!(
        fx.eval("t.parse('{{define \"foo\"}}{{ end }}').definedTemplates()"),
        r#"; defined templates are: "foo", "test_template""#
    );
}

#[test]
fn custom_delimiters() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "new Template('test_template')
               .delims('<<', '>>')
               .parse('<< .foo >> {{ .foo }}')
               .executeString({ foo: 'bar' })"
        ),
        "bar {{ .foo }}"
    );
}

#[test]
fn lookup_and_name() {
    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template');
         t.parse('{{ define \"inner\" }}inner{{ end }}');
         var inner = t.lookup('inner');",
    );
    assert_eq!(fx.eval("inner.name()"), "inner");
    assert_eq!(fx.eval("inner.executeString()"), "inner");
    assert_eq!(fx.eval("t.lookup('missing') === undefined"), "true");
}

#[test]
fn new_shares_the_namespace() {
    let fx = Fixture::load();
    fx.eval(
        "var t = new Template('test_template');
         t.new('inner').parse('new {{ .param }}');",
    );
    assert_eq!(fx.eval("t.executeTemplateString('inner', { param: 'p' })"), "new p");
    assert_eq!(fx.eval("t.templates().length"), "1");
}

#[test]
fn templates_lists_every_definition() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "new Template('test_template')
               .parse('{{ define \"a\" }}a{{ end }}{{ define \"b\" }}b{{ end }}')
               .templates()
               .map(t => t.name())
               .sort()
               .join()"
        ),
        "a,b,test_template"
    );
}

#[test]
fn missing_key_options() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template').parse('{{ .param }}');");
    assert_eq!(fx.eval("t.executeString({})"), "<no value>");

    fx.eval("t.option('missingkey=error')");
    assert_eq!(
        fx.thrown("t.executeString({})"),
        r#"template: test_template:1:3: executing "test_template" at <.param>: map has no entry for key "param""#
    );
}

#[test]
fn parse_files_on_an_instance() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('a.tpl').parseFiles(`${dataDir}/a.tpl`, `${dataDir}/b.tpl`);");
    assert_eq!(fx.eval("t.executeString()"), "template a\n");
    assert_eq!(fx.eval("t.executeTemplateString('b.tpl')"), "template b\n");
}

#[test]
fn static_parse_files_and_glob() {
    let fx = Fixture::load();
    fx.eval("var t = Template.parseFiles(`${dataDir}/a.tpl`, `${dataDir}/b.tpl`);");
    assert_eq!(fx.eval("t.name()"), "a.tpl");
    assert_eq!(fx.eval("t.executeString()"), "template a\n");

    fx.eval("var g = Template.parseGlob(`${dataDir}/*.tpl`);");
    assert_eq!(fx.eval("g.name()"), "a.tpl");
    assert_eq!(fx.eval("g.executeTemplateString('b.tpl')"), "template b\n");
}

#[test]
fn parse_glob_on_an_instance() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval("new Template('b.tpl').parseGlob(`${dataDir}/*.tpl`).executeString()"),
        "template b\n"
    );
}

#[test]
fn printing_host_values() {
    let fx = Fixture::load();
    fx.eval("var t = new Template('test_template').parse('{{ . }}');");
    let cases = [
        ("123", "123"),
        ("1.5", "1.5"),
        ("true", "true"),
        ("null", "<no value>"),
        ("undefined", "<no value>"),
        ("{ foo: 'bar' }", "map[foo:bar]"),
        ("['foo', 'bar']", "[foo bar]"),
    ];
    for (data, expected) in cases {
        assert_eq!(fx.eval(&format!("t.executeString({data})")), expected, "{data}");
    }
}

#[test]
fn bigint_data_prints_in_decimal() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval("new Template('test_template').parse('{{ . }}').executeString((1n << 128n) + 2n)"),
        "340282366920938463463374607431768211458"
    );
}

#[test]
fn bigint_results_cross_back() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "new Template('test_template')
               .funcs({ neg: x => -x })
               .parse('{{ neg . }}')
               .executeString((1n << 128n) + 2n)"
        ),
        "-340282366920938463463374607431768211458"
    );
}

#[test]
fn escapers() {
    let fx = Fixture::load();
    assert_eq!(fx.eval("stencil.htmlEscapeString('<br>')"), "&lt;br&gt;");
    assert_eq!(fx.eval("stencil.htmlEscaper('foo', '<bar>')"), "foo&lt;bar&gt;");
    assert_eq!(fx.eval(r#"stencil.jsEscapeString('"foo"')"#), r#"\"foo\""#);
    assert_eq!(fx.eval(r#"stencil.jsEscaper('foo', '"bar"')"#), r#"foo\"bar\""#);
    assert_eq!(fx.eval("stencil.urlQueryEscaper('foo', '&bar')"), "foo%26bar");
}

#[test]
fn helper_funcs() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "new Template('test_template')
               .addHelperFuncs()
               .parse('{{ dict \"a\" 42 }} {{ upper \"x\" }} {{ list 1 \"b\" }}')
               .executeString()"
        ),
        "map[a:42] X [1 b]"
    );
}

#[test]
fn hermetic_helpers_leave_out_the_environment() {
    let fx = Fixture::load();
    assert_eq!(
        fx.thrown("new Template('test_template').addHermeticHelperFuncs().parse('{{ env \"HOME\" }}')"),
        r#"template: test_template:1: function "env" not defined"#
    );
}

#[test]
fn helpers_replace_host_functions_of_the_same_name() {
    let fx = Fixture::load();
    fx.eval(
        "var mine = counter('mine', 'mine');
         var t = new Template('test_template').funcs({ upper: mine }).addHelperFuncs();
         t.parse('{{ upper \"x\" }}');",
    );
    assert_eq!(fx.eval("t.executeString()"), "X");
    assert_eq!(fx.eval("calls.mine"), "0");

    fx.eval("t.funcs({ upper: mine })");
    assert_eq!(fx.eval("t.executeString()"), "mine");
    assert_eq!(fx.eval("calls.mine"), "1");
}

#[test]
fn collection_during_a_host_function_spares_the_running_template() {
    let fx = Fixture::load();
    assert_eq!(
        fx.eval(
            "new Template('x')
               .funcs({ g: () => { gc(); return ''; }, f: () => 'F' })
               .parse('{{ g }}{{ f }}')
               .executeString()"
        ),
        "F"
    );
    fx.host.gc();
    assert_eq!(fx.eval("'still usable'"), "still usable");
}
