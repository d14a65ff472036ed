//! Static inspection of setup-script source.
//!
//! Scripts are parsed as ECMAScript modules before anything runs. Every
//! import form is collected from the syntax tree, and the default export is
//! followed to the function whose parameter list decides the calling
//! convention. Only module-level declarations can supply the default export.

use std::collections::{HashMap, HashSet};

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, AssignmentTargetPropertyIdentifier, BindingPattern, BindingPatternKind,
    CallExpression, Declaration, ExportAllDeclaration, ExportDefaultDeclarationKind,
    ExportNamedDeclaration, Expression, FormalParameters, ImportDeclaration,
    ImportDeclarationSpecifier, ImportExpression, Program, PropertyKey, SimpleAssignmentTarget,
    Statement, VariableDeclaration, VariableDeclarationKind,
};
use oxc_ast::{Visit, visit::walk};
use oxc_parser::Parser;
use oxc_span::{SourceType, Span};

/// How a module reference appeared in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportForm {
    /// `import x from '…'`, `import { a } from '…'`, `import * as n from '…'`
    Static,
    /// `import '…'`
    SideEffect,
    /// `export … from '…'`
    ReExport,
    /// `import(…)`
    Dynamic,
    /// `require(…)`
    Require,
}

/// Specifier recorded for `import(expr)`/`require(expr)` with a non-literal argument.
pub const COMPUTED_SPECIFIER: &str = "<computed>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub specifier: String,
    pub form: ImportForm,
    pub line: usize,
}

/// The accepted calling convention: one object pattern over `ctx`/`tools`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySignature {
    /// Which of `ctx` and `tools` the pattern binds, in source order.
    pub bindings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScriptInspection {
    pub imports: Vec<ImportRef>,
    /// `Err` carries a human-readable reason the entry point is unacceptable.
    pub entry: Result<EntrySignature, String>,
}

/// Parse `source` as a module and inspect it. `Err` carries the first syntax
/// error; a script that does not parse is never run.
pub fn inspect_source(source: &str) -> Result<ScriptInspection, String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::default().with_module(true)).parse();
    if let Some(error) = parsed.errors.first() {
        return Err(error.to_string());
    }
    if parsed.panicked {
        return Err("parser stopped before the end of the script".to_string());
    }

    let mut scan = ModuleScan::new(source);
    scan.visit_program(&parsed.program);
    let entry = EntryResolver::new(&parsed.program, &scan.reassigned).entry();
    Ok(ScriptInspection {
        imports: scan.imports,
        entry,
    })
}

const ENTRY_KEYS: &[&str] = &["ctx", "tools"];

const MAX_ALIAS_DEPTH: usize = 4;

/// Single pass over the whole tree: module references of every form, and
/// every name that is assigned to anywhere in the module.
struct ModuleScan<'s> {
    source: &'s str,
    imports: Vec<ImportRef>,
    reassigned: HashSet<String>,
}

impl<'s> ModuleScan<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            imports: Vec::new(),
            reassigned: HashSet::new(),
        }
    }

    fn push(&mut self, specifier: Option<String>, form: ImportForm, span: Span) {
        let line = self
            .source
            .get(..span.start as usize)
            .map_or(1, |before| before.matches('\n').count() + 1);
        self.imports.push(ImportRef {
            specifier: specifier.unwrap_or_else(|| COMPUTED_SPECIFIER.to_string()),
            form,
            line,
        });
    }
}

impl<'a> Visit<'a> for ModuleScan<'_> {
    fn visit_import_declaration(&mut self, it: &ImportDeclaration<'a>) {
        let form = if it.specifiers.is_none() {
            ImportForm::SideEffect
        } else {
            ImportForm::Static
        };
        self.push(Some(it.source.value.to_string()), form, it.span);
        walk::walk_import_declaration(self, it);
    }

    fn visit_export_named_declaration(&mut self, it: &ExportNamedDeclaration<'a>) {
        if let Some(source) = &it.source {
            self.push(Some(source.value.to_string()), ImportForm::ReExport, it.span);
        }
        walk::walk_export_named_declaration(self, it);
    }

    fn visit_export_all_declaration(&mut self, it: &ExportAllDeclaration<'a>) {
        self.push(Some(it.source.value.to_string()), ImportForm::ReExport, it.span);
        walk::walk_export_all_declaration(self, it);
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        self.push(literal_specifier(&it.source), ImportForm::Dynamic, it.span);
        walk::walk_import_expression(self, it);
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &it.callee
            && callee.name.as_str() == "require"
        {
            let specifier = it
                .arguments
                .first()
                .and_then(Argument::as_expression)
                .and_then(literal_specifier);
            self.push(specifier, ImportForm::Require, it.span);
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_simple_assignment_target(&mut self, it: &SimpleAssignmentTarget<'a>) {
        if let SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) = it {
            self.reassigned.insert(ident.name.to_string());
        }
        walk::walk_simple_assignment_target(self, it);
    }

    fn visit_assignment_target_property_identifier(
        &mut self,
        it: &AssignmentTargetPropertyIdentifier<'a>,
    ) {
        self.reassigned.insert(it.binding.name.to_string());
        walk::walk_assignment_target_property_identifier(self, it);
    }
}

/// A string literal, or a template literal without substitutions.
fn literal_specifier(expr: &Expression<'_>) -> Option<String> {
    match expr {
        Expression::StringLiteral(lit) => Some(lit.value.to_string()),
        Expression::TemplateLiteral(tpl) if tpl.expressions.is_empty() => tpl
            .quasis
            .first()
            .and_then(|quasi| quasi.value.cooked.as_ref())
            .map(|cooked| cooked.to_string()),
        Expression::ParenthesizedExpression(inner) => literal_specifier(&inner.expression),
        _ => None,
    }
}

/// What a module-level name was declared as.
enum Binding<'p, 'a> {
    Function(&'p FormalParameters<'a>),
    Const(Option<&'p Expression<'a>>),
    Mutable(&'static str),
    Class,
    Import,
    Destructured,
}

struct EntryResolver<'p, 'a> {
    program: &'p Program<'a>,
    bindings: HashMap<String, Vec<Binding<'p, 'a>>>,
    reassigned: &'p HashSet<String>,
}

impl<'p, 'a> EntryResolver<'p, 'a> {
    fn new(program: &'p Program<'a>, reassigned: &'p HashSet<String>) -> Self {
        let mut resolver = Self {
            program,
            bindings: HashMap::new(),
            reassigned,
        };
        for statement in &program.body {
            resolver.declare_statement(statement);
        }
        resolver
    }

    fn declare(&mut self, name: &str, binding: Binding<'p, 'a>) {
        self.bindings.entry(name.to_string()).or_default().push(binding);
    }

    fn declare_statement(&mut self, statement: &'p Statement<'a>) {
        match statement {
            Statement::FunctionDeclaration(function) => {
                if let Some(id) = &function.id {
                    self.declare(&id.name, Binding::Function(&function.params));
                }
            }
            Statement::VariableDeclaration(declaration) => self.declare_variables(declaration),
            Statement::ClassDeclaration(class) => {
                if let Some(id) = &class.id {
                    self.declare(&id.name, Binding::Class);
                }
            }
            Statement::ImportDeclaration(import) => {
                for specifier in import.specifiers.iter().flatten() {
                    let local = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
                    };
                    self.declare(&local.name, Binding::Import);
                }
            }
            Statement::ExportNamedDeclaration(export) => match &export.declaration {
                Some(Declaration::FunctionDeclaration(function)) => {
                    if let Some(id) = &function.id {
                        self.declare(&id.name, Binding::Function(&function.params));
                    }
                }
                Some(Declaration::VariableDeclaration(declaration)) => {
                    self.declare_variables(declaration)
                }
                Some(Declaration::ClassDeclaration(class)) => {
                    if let Some(id) = &class.id {
                        self.declare(&id.name, Binding::Class);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    fn declare_variables(&mut self, declaration: &'p VariableDeclaration<'a>) {
        let keyword = match declaration.kind {
            VariableDeclarationKind::Const => None,
            VariableDeclarationKind::Let => Some("let"),
            VariableDeclarationKind::Var => Some("var"),
            _ => Some("using"),
        };
        for declarator in &declaration.declarations {
            if let BindingPatternKind::BindingIdentifier(id) = &declarator.id.kind {
                let binding = match keyword {
                    None => Binding::Const(declarator.init.as_ref()),
                    Some(keyword) => Binding::Mutable(keyword),
                };
                self.declare(&id.name, binding);
            } else {
                let mut names = Vec::new();
                pattern_names(&declarator.id, &mut names);
                for name in names {
                    self.declare(&name, Binding::Destructured);
                }
            }
        }
    }

    fn entry(&self) -> Result<EntrySignature, String> {
        for statement in &self.program.body {
            match statement {
                Statement::ExportDefaultDeclaration(export) => {
                    return self.default_kind(&export.declaration);
                }
                Statement::ExportNamedDeclaration(export) => {
                    for specifier in &export.specifiers {
                        if specifier.exported.name().as_str() != "default" {
                            continue;
                        }
                        if let Some(source) = &export.source {
                            return Err(format!(
                                "default export is re-exported from '{}'",
                                source.value
                            ));
                        }
                        return self.resolve(&specifier.local.name(), 0);
                    }
                }
                _ => {}
            }
        }
        Err("module has no default export".to_string())
    }

    fn default_kind(&self, kind: &ExportDefaultDeclarationKind<'a>) -> Result<EntrySignature, String> {
        match kind {
            ExportDefaultDeclarationKind::FunctionDeclaration(function)
            | ExportDefaultDeclarationKind::FunctionExpression(function) => {
                parameters(&function.params)
            }
            ExportDefaultDeclarationKind::ArrowFunctionExpression(arrow) => parameters(&arrow.params),
            ExportDefaultDeclarationKind::ClassDeclaration(_)
            | ExportDefaultDeclarationKind::ClassExpression(_) => {
                Err("default export is a class, not a function".to_string())
            }
            ExportDefaultDeclarationKind::Identifier(ident) => self.resolve(&ident.name, 1),
            ExportDefaultDeclarationKind::ParenthesizedExpression(inner) => {
                self.expression(&inner.expression, 1)
            }
            _ => Err("default export is not a function".to_string()),
        }
    }

    fn expression(&self, expr: &Expression<'a>, depth: usize) -> Result<EntrySignature, String> {
        match expr {
            Expression::FunctionExpression(function) => parameters(&function.params),
            Expression::ArrowFunctionExpression(arrow) => parameters(&arrow.params),
            Expression::ClassExpression(_) => {
                Err("default export is a class, not a function".to_string())
            }
            Expression::Identifier(ident) => self.resolve(&ident.name, depth + 1),
            Expression::ParenthesizedExpression(inner) => self.expression(&inner.expression, depth),
            _ => Err("default export is not a function".to_string()),
        }
    }

    /// Follow `export default name` to the single module-level declaration
    /// of `name`. Nested scopes never count.
    fn resolve(&self, name: &str, depth: usize) -> Result<EntrySignature, String> {
        if depth > MAX_ALIAS_DEPTH {
            return Err(format!("could not resolve default export '{name}'"));
        }
        let declared = match self.bindings.get(name).map(Vec::as_slice) {
            None | Some([]) => {
                return Err(format!(
                    "default export '{name}' is not a function declared in this module"
                ));
            }
            Some([single]) => single,
            Some(_) => {
                return Err(format!("default export '{name}' is declared more than once"));
            }
        };
        if self.reassigned.contains(name) {
            return Err(format!("default export '{name}' is reassigned in this module"));
        }
        match declared {
            Binding::Function(params) => parameters(params),
            Binding::Const(Some(init)) => self.expression(init, depth),
            Binding::Const(None) | Binding::Destructured => {
                Err("default export is not a function".to_string())
            }
            Binding::Mutable(keyword) => Err(format!(
                "default export '{name}' is declared with {keyword}; use const or a function declaration"
            )),
            Binding::Class => Err("default export is a class, not a function".to_string()),
            Binding::Import => Err(format!(
                "default export '{name}' is imported, not declared in this module"
            )),
        }
    }
}

fn pattern_names(pattern: &BindingPattern<'_>, names: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(id) => names.push(id.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                pattern_names(&property.value, names);
            }
            if let Some(rest) = &object.rest {
                pattern_names(&rest.argument, names);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                pattern_names(element, names);
            }
            if let Some(rest) = &array.rest {
                pattern_names(&rest.argument, names);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => pattern_names(&assign.left, names),
    }
}

fn parameters(params: &FormalParameters<'_>) -> Result<EntrySignature, String> {
    let count = params.items.len() + usize::from(params.rest.is_some());
    match (params.items.as_slice(), &params.rest) {
        ([], None) => Err("declares no parameters".to_string()),
        ([], Some(_)) => Err("declares a rest parameter".to_string()),
        ([single], None) => object_pattern(&single.pattern),
        _ => Err(format!(
            "declares {count} positional parameters instead of one {{ ctx, tools }} object"
        )),
    }
}

fn object_pattern(pattern: &BindingPattern<'_>) -> Result<EntrySignature, String> {
    let object = match &pattern.kind {
        BindingPatternKind::ObjectPattern(object) => object,
        BindingPatternKind::BindingIdentifier(id) => {
            return Err(format!(
                "takes a single positional parameter '{}' instead of a {{ ctx, tools }} object pattern",
                id.name
            ));
        }
        BindingPatternKind::AssignmentPattern(_) => {
            return Err("parameter must not have a default value".to_string());
        }
        BindingPatternKind::ArrayPattern(_) => {
            return Err("parameter must be a { ctx, tools } object pattern".to_string());
        }
    };
    if object.rest.is_some() {
        return Err("parameter pattern uses a rest element".to_string());
    }

    let mut bindings: Vec<String> = Vec::new();
    for property in &object.properties {
        let key = match &property.key {
            _ if property.computed => None,
            PropertyKey::StaticIdentifier(ident) => Some(ident.name.as_str()),
            PropertyKey::StringLiteral(lit) => Some(lit.value.as_str()),
            _ => None,
        };
        let Some(key) = key else {
            return Err("parameter pattern uses a computed key".to_string());
        };
        if !ENTRY_KEYS.contains(&key) {
            return Err(format!(
                "parameter pattern binds '{key}'; only ctx and tools are provided"
            ));
        }
        if !bindings.iter().any(|b| b == key) {
            bindings.push(key.to_string());
        }
    }
    if bindings.is_empty() {
        return Err("parameter pattern binds neither ctx nor tools".to_string());
    }
    Ok(EntrySignature { bindings })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inspect(source: &str) -> ScriptInspection {
        inspect_source(source).unwrap_or_else(|e| panic!("{source}: {e}"))
    }

    fn entry(source: &str) -> Result<Vec<String>, String> {
        inspect(source).entry.map(|s| s.bindings)
    }

    fn specifiers(source: &str) -> Vec<(String, ImportForm)> {
        inspect(source)
            .imports
            .into_iter()
            .map(|i| (i.specifier, i.form))
            .collect()
    }

    #[test]
    fn destructured_entry_points_are_accepted() {
        let accepted = [
            "export default async function ({ ctx, tools }) { await tools.files.write('a', 'b'); }",
            "export default function setup({ctx, tools}) {}",
            "export default async ({ tools }) => {}",
            "export default ({ ctx: c, tools: { files } }) => files",
            "async function main({ tools, ctx }) {}\nexport default main;",
            "const run = async ({ ctx }) => {};\nexport { run as default };",
            "export default function ({ ctx, tools, }) {}",
            "const inner = ({ ctx }) => {};\nconst outer = inner;\nexport default outer;",
        ];
        for source in accepted {
            assert!(entry(source).is_ok(), "should accept: {source}: {:?}", entry(source));
        }
        assert_eq!(
            entry("export default function ({ tools, ctx }) {}").unwrap(),
            vec!["tools", "ctx"]
        );
    }

    #[test]
    fn other_calling_conventions_are_rejected() {
        let rejected = [
            ("export default function (ctx, tools) {}", "2 positional"),
            ("export default async function () {}", "no parameters"),
            ("export default async (env) => {}", "single positional parameter 'env'"),
            ("export default env => {}", "single positional parameter 'env'"),
            ("export default function ({ ctx, tools } = {}) {}", "default value"),
            ("export default function ({ ctx, fs }) {}", "binds 'fs'"),
            ("export default function ({ ...all }) {}", "rest element"),
            ("export default function (...args) {}", "rest parameter"),
            ("export default function ({ [key]: x }) {}", "computed key"),
            ("export default class Setup {}", "class"),
            ("export default 42;", "not a function"),
            ("export function setup({ ctx }) {}", "no default export"),
            ("const x = 1;\nexport default x;", "not a function"),
            ("export { default } from './other.mjs';", "re-exported"),
            ("import main from './other.mjs';\nexport default main;", "imported"),
        ];
        for (source, reason) in rejected {
            let err = entry(source).unwrap_err();
            assert!(err.contains(reason), "{source}: expected '{reason}' in '{err}'");
        }
    }

    #[test]
    fn nested_declarations_do_not_supply_the_default_export() {
        let source = "function wrap() { function main({ ctx }) {} }\nfunction main(ctx, tools) {}\nexport default main;";
        assert!(entry(source).unwrap_err().contains("2 positional"));

        let only_nested = "function wrap() { const main = ({ ctx }) => {}; }\nexport default main;";
        assert!(entry(only_nested).unwrap_err().contains("not a function declared"));
    }

    #[test]
    fn redeclared_or_reassigned_default_binding_is_rejected() {
        let rejected = [
            (
                "function main({ ctx }) {}\nfunction main(ctx, tools) {}\nexport default main;",
                "more than once",
            ),
            (
                "function main({ ctx }) {}\nmain = function (ctx, tools) {};\nexport default main;",
                "reassigned",
            ),
            (
                "function main({ ctx }) {}\n({ main } = { main: (ctx) => {} });\nexport default main;",
                "reassigned",
            ),
            ("let main = ({ ctx }) => {};\nexport default main;", "declared with let"),
            ("var main = ({ ctx }) => {};\nexport default main;", "declared with var"),
        ];
        for (source, reason) in rejected {
            let err = entry(source).unwrap_err();
            assert!(err.contains(reason), "{source}: expected '{reason}' in '{err}'");
        }
    }

    #[test]
    fn finds_every_import_form() {
        let source = r#"
import fs from 'node:fs';
import { exec } from "child_process";
import * as path from 'path';
import 'polyfill';
export { get } from 'https';
export * from './helpers.mjs';
const net = await import('node:net');
const os = require('os');
const dynamic = await import(name);
export default async function ({ tools }) {}
"#;
        assert_eq!(
            specifiers(source),
            vec![
                ("node:fs".to_string(), ImportForm::Static),
                ("child_process".to_string(), ImportForm::Static),
                ("path".to_string(), ImportForm::Static),
                ("polyfill".to_string(), ImportForm::SideEffect),
                ("https".to_string(), ImportForm::ReExport),
                ("./helpers.mjs".to_string(), ImportForm::ReExport),
                ("node:net".to_string(), ImportForm::Dynamic),
                ("os".to_string(), ImportForm::Require),
                (COMPUTED_SPECIFIER.to_string(), ImportForm::Dynamic),
            ]
        );
    }

    #[test]
    fn comments_and_strings_do_not_count_as_imports() {
        let source = r#"
// import fs from 'fs';
/* const cp = require('child_process'); */
const doc = "import net from 'net'";
const re = /import\('x'\)/g;
const url = import.meta.url;
export default async function ({ tools }) {
  await tools.text.append_lines('README.md', [`import x from 'y'`]);
}
"#;
        assert!(specifiers(source).is_empty());
    }

    #[test]
    fn division_and_regex_cannot_hide_an_import() {
        let sources = [
            "let a = 1, g = 1;\na++ /g; import { writeFileSync } from 'node:fs'; //\nexport default async function ({ ctx, tools }) {}",
            "const s = '';\nif (s) /'/.test(s); import { writeFileSync } from 'node:fs'; // '\nexport default async function ({ tools }) {}",
            "const x = 4 / 2 /* import cp from 'child_process' */; import { writeFileSync } from 'node:fs';\nexport default ({ ctx }) => {};",
        ];
        for source in sources {
            let imports = specifiers(source);
            assert!(
                imports.contains(&("node:fs".to_string(), ImportForm::Static)),
                "{source}: {imports:?}"
            );
        }
    }

    #[test]
    fn template_and_computed_specifiers() {
        let source = "const x = 'fs';\nawait import(`node:fs`);\nawait import(`node:${x}`);\nrequire('f' + 's');\nrequire(...[x]);\nexport default ({ ctx }) => {};";
        assert_eq!(
            specifiers(source),
            vec![
                ("node:fs".to_string(), ImportForm::Dynamic),
                (COMPUTED_SPECIFIER.to_string(), ImportForm::Dynamic),
                (COMPUTED_SPECIFIER.to_string(), ImportForm::Require),
                (COMPUTED_SPECIFIER.to_string(), ImportForm::Require),
            ]
        );
    }

    #[test]
    fn imports_inside_template_expressions_are_found() {
        let source = "const s = `${(await import('node:fs')).readFileSync('/etc/passwd')}`;\nexport default ({ ctx }) => {};";
        let found = inspect(source);
        assert_eq!(found.imports.len(), 1);
        assert_eq!(found.imports[0].specifier, "node:fs");
        assert!(found.entry.is_ok());
    }

    #[test]
    fn reports_import_line_numbers() {
        let found = inspect("\n\n  import fs from 'fs';\nexport default ({ ctx }) => {};");
        assert_eq!(found.imports[0].line, 3);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(inspect_source("export default function ({ ctx }) {").is_err());
        assert!(inspect_source("import { from 'fs';").is_err());
    }
}
