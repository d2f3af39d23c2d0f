//! Code generation over the syntax tree.

use std::collections::HashMap;

use super::{BUILTIN_FILTERS, context_lookup, js_literal, js_string, suggest};
use crate::addons::ExtensionRef;
use crate::core::LoaderError;
use crate::template::ast::{BinaryOp, CompareOp, KeywordArg, Param, UnaryOp};
use crate::template::{Environment, Literal, Node, NodeKind, Template};

type Result<T> = std::result::Result<T, LoaderError>;

/// Whether any filter or extension call in `tree` must be awaited.
pub(super) fn requires_async(tree: &Template, env: &Environment) -> bool {
    tree.walk().into_iter().any(|node| match &node.kind {
        NodeKind::Filter {
            name,
            ..
        } => env.filter(name).is_some_and(|d| d.instance.is_async()),
        NodeKind::CallExtension {
            ext,
            is_async,
            ..
        } => *is_async || env.resolve_extension(ext).is_some_and(|d| d.instance.is_async()),
        _ => false,
    })
}

fn compare_op(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::StrictEq => "===",
        CompareOp::Ne => "!=",
        CompareOp::StrictNe => "!==",
        CompareOp::Lt => "<",
        CompareOp::Gt => ">",
        CompareOp::Le => "<=",
        CompareOp::Ge => ">=",
    }
}

/// Display name of a callee for runtime error messages.
fn callee_display(node: &Node) -> String {
    match &node.kind {
        NodeKind::Symbol(name) => name.clone(),
        NodeKind::Lookup {
            target,
            key,
        } => match &key.kind {
            NodeKind::Literal(Literal::Str(key)) => format!("{}[\"{key}\"]", callee_display(target)),
            _ => format!("{}[...]", callee_display(target)),
        },
        NodeKind::FunCall {
            callee,
            ..
        } => format!("{}()", callee_display(callee)),
        _ => "--expression--".to_string(),
    }
}

pub(super) struct CodeGen<'a> {
    template: &'a str,
    env: &'a Environment,
    is_async: bool,
    buffer: String,
    temps: usize,
    scopes: Vec<HashMap<String, String>>,
    blocks: Vec<&'a Node>,
}

impl<'a> CodeGen<'a> {
    pub(super) fn new(template: &'a str, env: &'a Environment, is_async: bool) -> Self {
        Self {
            template,
            env,
            is_async,
            buffer: String::new(),
            temps: 0,
            scopes: vec![HashMap::new()],
            blocks: Vec::new(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> LoaderError {
        LoaderError::Compile {
            template: self.template.to_string(),
            reason: reason.into(),
        }
    }

    fn line(&mut self, code: &str) {
        self.buffer.push_str(code);
        self.buffer.push('\n');
    }

    fn tmp(&mut self) -> String {
        self.temps += 1;
        format!("t_{}", self.temps)
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name)).map(String::as_str)
    }

    fn bind(&mut self, name: &str, id: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id.to_string());
        }
    }

    const fn fn_kw(&self) -> &'static str {
        if self.is_async { "async function" } else { "function" }
    }

    fn awaited(&self, call: String) -> String {
        if self.is_async { format!("(await {call})") } else { call }
    }

    fn prologue(&mut self) {
        self.line("var lineno = 0;");
        self.line("var colno = 0;");
        self.line("var output = \"\";");
    }

    /// Run `f` with output redirected to a fresh buffer and return that text.
    fn capture(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<String> {
        let saved = std::mem::take(&mut self.buffer);
        self.scopes.push(HashMap::new());
        let result = f(self);
        self.scopes.pop();
        let text = std::mem::replace(&mut self.buffer, saved);
        result.map(|()| text)
    }

    pub(super) fn compile_root(mut self, tree: &'a Template, var_name: &str) -> Result<String> {
        self.line(&format!("var {var_name} = (function() {{"));
        self.line(&format!("{} root(env, context, frame, runtime) {{", self.fn_kw()));
        self.prologue();
        self.line("var parentTemplate = null;");
        self.compile_nodes(&tree.body)?;
        self.line("if (parentTemplate) {");
        let parent = self.awaited("parentTemplate.rootRenderFunc(env, context, frame, runtime)".into());
        self.line(&format!("return {parent};"));
        self.line("}");
        self.line("return output;");
        self.line("}");

        let mut names: Vec<&str> = Vec::new();
        let mut next = 0;
        while next < self.blocks.len() {
            let node = self.blocks[next];
            next += 1;
            let NodeKind::Block {
                name,
                body,
            } = &node.kind
            else {
                continue;
            };
            if names.contains(&name.as_str()) {
                return Err(self.error(format!("block '{name}' defined more than once")));
            }
            names.push(name);

            let saved = std::mem::replace(&mut self.scopes, vec![HashMap::new()]);
            self.line(&format!("{} b_{name}(env, context, frame, runtime) {{", self.fn_kw()));
            self.prologue();
            self.line("frame = frame.push(true);");
            self.compile_nodes(body)?;
            self.line("return output;");
            self.line("}");
            self.scopes = saved;
        }

        self.line("return {");
        for name in &names {
            self.line(&format!("b_{name}: b_{name},"));
        }
        self.line("root: root");
        self.line("};");
        self.line("})();");
        Ok(self.buffer)
    }

    fn compile_nodes(&mut self, nodes: &'a [Node]) -> Result<()> {
        nodes.iter().try_for_each(|node| self.compile_node(node))
    }

    fn compile_node(&mut self, node: &'a Node) -> Result<()> {
        match &node.kind {
            NodeKind::TemplateData(text) => {
                if !text.is_empty() {
                    self.line(&format!("output += {};", js_string(text)));
                }
            }
            NodeKind::Output(children) => {
                for child in children {
                    if let NodeKind::TemplateData(_) = child.kind {
                        self.compile_node(child)?;
                        continue;
                    }
                    let mut value = self.compile_expr(child)?;
                    let options = self.env.options();
                    let autoescape = options.autoescape;
                    if options.throw_on_undefined {
                        value = format!(
                            "runtime.ensureDefined({value}, {}, {})",
                            child.span.line, child.span.col
                        );
                    }
                    self.line(&format!("output += runtime.suppressValue({value}, {autoescape});"));
                }
            }
            NodeKind::If {
                cond,
                body,
                else_body,
            } => {
                let cond = self.compile_expr(cond)?;
                self.line(&format!("if ({cond}) {{"));
                self.compile_nodes(body)?;
                if !else_body.is_empty() {
                    self.line("} else {");
                    self.compile_nodes(else_body)?;
                }
                self.line("}");
            }
            NodeKind::For {
                targets,
                iter,
                body,
                else_body,
            } => self.compile_for(targets, iter, body, else_body)?,
            NodeKind::Set {
                targets,
                value,
            } => {
                let value = self.compile_expr(value)?;
                let ids: Vec<String> = targets
                    .iter()
                    .map(|t| self.lookup(t).map(str::to_string).unwrap_or_else(|| self.tmp()))
                    .collect();
                for id in &ids {
                    self.line(&format!("var {id};"));
                }
                self.line(&format!("{} = {value};", ids.join(" = ")));
                for (target, id) in targets.iter().zip(&ids) {
                    self.set_variable(target, id);
                }
            }
            NodeKind::Block {
                name,
                ..
            } => {
                self.blocks.push(node);
                let call = self.awaited(format!(
                    "context.getBlock({})(env, context, frame, runtime)",
                    js_string(name)
                ));
                self.line("if (!parentTemplate) {");
                self.line(&format!("output += {call};"));
                self.line("}");
            }
            NodeKind::Macro {
                name,
                params,
                body,
            } => {
                let id = self.tmp();
                let func = self.compile_macro(params, body, false)?;
                self.line(&format!("var {id} = {func};"));
                self.set_variable(name, &id);
            }
            NodeKind::Extends {
                template,
            } => {
                let target = self.compile_expr(template)?;
                let id = self.tmp();
                let get = self.awaited(format!(
                    "env.getTemplate({target}, true, {})",
                    js_string(self.template)
                ));
                self.line(&format!("var {id} = {get};"));
                self.line(&format!("parentTemplate = {id};"));
                self.line(
                    "for (var n in parentTemplate.blocks) { context.addBlock(n, parentTemplate.blocks[n]); }",
                );
            }
            NodeKind::Include {
                template,
                ignore_missing,
            } => {
                let target = self.compile_expr(template)?;
                let id = self.tmp();
                let get = self.awaited(format!(
                    "env.getTemplate({target}, false, {}, {ignore_missing})",
                    js_string(self.template)
                ));
                self.line(&format!("var {id} = {get};"));
                let render = self.awaited(format!("{id}.render(context.getVariables(), frame)"));
                self.line(&format!("if ({id}) {{ output += {render}; }}"));
            }
            NodeKind::Import {
                template,
                target,
                with_context,
            } => {
                let id = self.compile_import(template, *with_context)?;
                self.set_variable(target, &id);
            }
            NodeKind::FromImport {
                template,
                names,
                with_context,
            } => {
                let module = self.compile_import(template, *with_context)?;
                for (name, alias) in names {
                    let id = self.tmp();
                    let key = js_string(name);
                    self.line(&format!("var {id};"));
                    self.line(&format!(
                        "if (Object.prototype.hasOwnProperty.call({module}, {key})) {{ {id} = {module}[{key}]; }} else {{ throw new Error(\"cannot import '{name}'\"); }}"
                    ));
                    self.set_variable(alias.as_deref().unwrap_or(name), &id);
                }
            }
            NodeKind::CallExtension {
                ..
            } => {
                let call = self.compile_expr(node)?;
                self.line(&format!(
                    "output += runtime.suppressValue({call}, {});",
                    self.env.options().autoescape
                ));
            }
            _ => {
                return Err(self.error(format!(
                    "unexpected {} at line {}, column {}",
                    node.describe(),
                    node.span.line,
                    node.span.col
                )));
            }
        }
        Ok(())
    }

    fn set_variable(&mut self, name: &str, id: &str) {
        let key = js_string(name);
        self.line(&format!("frame.set({key}, {id}, true);"));
        self.line(&format!("if (frame.topLevel) {{ context.setVariable({key}, {id}); }}"));
        if !name.starts_with('_') {
            self.line(&format!("if (frame.topLevel) {{ context.addExport({key}, {id}); }}"));
        }
        self.bind(name, id);
    }

    fn compile_import(&mut self, template: &'a Node, with_context: bool) -> Result<String> {
        let target = self.compile_expr(template)?;
        let id = self.tmp();
        let get = self.awaited(format!(
            "env.getTemplate({target}, false, {}, false)",
            js_string(self.template)
        ));
        self.line(&format!("var {id} = {get};"));
        let args = if with_context { "context.getVariables(), frame" } else { "" };
        let exported = self.awaited(format!("{id}.getExported({args})"));
        self.line(&format!("{id} = {exported};"));
        Ok(id)
    }

    fn compile_for(
        &mut self,
        targets: &[String],
        iter: &'a Node,
        body: &'a [Node],
        else_body: &'a [Node],
    ) -> Result<()> {
        let iter = self.compile_expr(iter)?;
        let arr = self.tmp();
        let len = self.tmp();
        let i = self.tmp();

        self.line("frame = frame.push();");
        self.line(&format!("var {arr} = {iter};"));
        self.line(&format!("if ({arr}) {{"));
        self.line(&format!("{arr} = runtime.fromIterator({arr});"));
        if targets.len() > 1 {
            self.line(&format!("{arr} = runtime.isArray({arr}) ? {arr} : Object.entries({arr});"));
        }
        self.line(&format!("var {len} = {arr}.length;"));
        self.line(&format!("for (var {i} = 0; {i} < {len}; {i}++) {{"));

        self.scopes.push(HashMap::new());
        for (n, target) in targets.iter().enumerate() {
            let id = self.tmp();
            let item = if targets.len() > 1 { format!("{arr}[{i}][{n}]") } else { format!("{arr}[{i}]") };
            self.line(&format!("var {id} = {item};"));
            self.line(&format!("frame.set({}, {id});", js_string(target)));
            self.bind(target, &id);
        }
        self.line(&format!("frame.set(\"loop.index\", {i} + 1);"));
        self.line(&format!("frame.set(\"loop.index0\", {i});"));
        self.line(&format!("frame.set(\"loop.revindex\", {len} - {i});"));
        self.line(&format!("frame.set(\"loop.revindex0\", {len} - {i} - 1);"));
        self.line(&format!("frame.set(\"loop.first\", {i} === 0);"));
        self.line(&format!("frame.set(\"loop.last\", {i} === {len} - 1);"));
        self.line(&format!("frame.set(\"loop.length\", {len});"));
        let result = self.compile_nodes(body);
        self.scopes.pop();
        result?;
        self.line("}");
        self.line("}");

        if !else_body.is_empty() {
            self.line(&format!("if (!{len}) {{"));
            self.compile_nodes(else_body)?;
            self.line("}");
        }
        self.line("frame = frame.pop();");
        Ok(())
    }

    /// `runtime.makeMacro(...)` expression for a macro or caller body.
    fn compile_macro(&mut self, params: &'a [Param], body: &'a [Node], caller: bool) -> Result<String> {
        let fn_kw = self.fn_kw();
        self.capture(|cg| {
            let positional: Vec<&Param> = params.iter().filter(|p| p.default.is_none()).collect();
            let named: Vec<&Param> = params.iter().filter(|p| p.default.is_some()).collect();

            let quote = |ps: &[&Param]| ps.iter().map(|p| js_string(&p.name)).collect::<Vec<_>>().join(", ");
            let mut args: Vec<String> = positional.iter().map(|p| format!("l_{}", p.name)).collect();
            args.push("kwargs".to_string());

            cg.buffer.push_str(&format!(
                "runtime.makeMacro([{}], [{}], {fn_kw} ({}) {{\n",
                quote(&positional[..]),
                quote(&named[..]),
                args.join(", ")
            ));
            cg.line("var callerFrame = frame;");
            cg.line(if caller { "frame = frame.push(true);" } else { "frame = new runtime.Frame();" });
            cg.line("kwargs = kwargs || {};");
            cg.line(
                "if (Object.prototype.hasOwnProperty.call(kwargs, \"caller\")) { frame.set(\"caller\", kwargs.caller); }",
            );
            for p in &positional {
                cg.line(&format!("frame.set({}, l_{});", js_string(&p.name), p.name));
                cg.bind(&p.name, &format!("l_{}", p.name));
            }
            for p in &named {
                let key = js_string(&p.name);
                let default = match &p.default {
                    Some(node) => cg.compile_expr(node)?,
                    None => "undefined".to_string(),
                };
                cg.line(&format!(
                    "frame.set({key}, Object.prototype.hasOwnProperty.call(kwargs, {key}) ? kwargs[{key}] : {default});"
                ));
            }
            cg.line("var output = \"\";");
            cg.compile_nodes(body)?;
            cg.line("frame = callerFrame;");
            cg.line("return new runtime.SafeString(output);");
            cg.buffer.push_str("})");
            Ok(())
        })
    }

    /// A zero-argument function expression rendering `body`.
    fn compile_closure(&mut self, body: &'a [Node]) -> Result<String> {
        let fn_kw = self.fn_kw();
        self.capture(|cg| {
            cg.buffer.push_str(&format!("{fn_kw} () {{\n"));
            cg.line("var output = \"\";");
            cg.compile_nodes(body)?;
            cg.line("return output;");
            cg.buffer.push('}');
            Ok(())
        })
    }

    fn compile_kwargs(&mut self, kwargs: &'a [KeywordArg]) -> Result<Option<String>> {
        if kwargs.is_empty() {
            return Ok(None);
        }
        let pairs = kwargs
            .iter()
            .map(|kw| Ok(format!("{}: {}", js_string(&kw.name), self.compile_expr(&kw.value)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format!("runtime.makeKeywordArgs({{{}}})", pairs.join(", "))))
    }

    fn compile_args(&mut self, args: &'a [Node], kwargs: &'a [KeywordArg]) -> Result<Vec<String>> {
        let mut out = args.iter().map(|a| self.compile_expr(a)).collect::<Result<Vec<_>>>()?;
        out.extend(self.compile_kwargs(kwargs)?);
        Ok(out)
    }

    /// Operand of a binary or comparison, parenthesized unless it continues
    /// an add chain.
    fn compile_operand(&mut self, node: &'a Node, parent: Option<BinaryOp>) -> Result<String> {
        let code = self.compile_expr(node)?;
        let wrap = match &node.kind {
            NodeKind::Binary {
                op,
                ..
            } => !(parent == Some(BinaryOp::Add) && *op == BinaryOp::Add),
            NodeKind::Compare { .. } | NodeKind::InlineIf { .. } | NodeKind::Is { .. } => true,
            NodeKind::Unary {
                op: UnaryOp::Not,
                ..
            } => true,
            _ => false,
        };
        Ok(if wrap { format!("({code})") } else { code })
    }

    fn compile_filter(
        &mut self,
        name: &str,
        target: &'a Node,
        args: &'a [Node],
        kwargs: &'a [KeywordArg],
    ) -> Result<String> {
        let asynchronous = match self.env.filter(name) {
            Some(descriptor) => descriptor.instance.is_async(),
            None if BUILTIN_FILTERS.contains(&name) => false,
            None => {
                let known = BUILTIN_FILTERS
                    .iter()
                    .copied()
                    .chain(self.env.filters().iter().map(|d| d.name.as_str()));
                let hint = suggest(name, known)
                    .map(|s| format!(" (did you mean '{s}'?)"))
                    .unwrap_or_default();
                return Err(self.error(format!("unknown filter '{name}'{hint}")));
            }
        };

        let mut parts = vec![self.compile_expr(target)?];
        parts.extend(self.compile_args(args, kwargs)?);
        let call = format!("env.getFilter({}).call(context, {})", js_string(name), parts.join(", "));
        Ok(if asynchronous { format!("(await {call})") } else { call })
    }

    fn compile_extension(
        &mut self,
        ext: &ExtensionRef,
        method: &str,
        args: &'a [Node],
        kwargs: &'a [KeywordArg],
        bodies: &'a [Vec<Node>],
        is_async: bool,
    ) -> Result<String> {
        let env = self.env;
        let Some(descriptor) = env.resolve_extension(ext) else {
            return Err(self.error(format!("extension '{ext}' is not registered")));
        };
        let asynchronous = is_async || descriptor.instance.is_async();

        let mut parts = vec!["context".to_string()];
        parts.extend(self.compile_args(args, kwargs)?);
        for body in bodies {
            parts.push(self.compile_closure(body)?);
        }
        let call = format!(
            "env.getExtension({})[{}]({})",
            js_string(&descriptor.name),
            js_string(method),
            parts.join(", ")
        );
        Ok(if asynchronous { format!("(await {call})") } else { call })
    }

    fn compile_expr(&mut self, node: &'a Node) -> Result<String> {
        Ok(match &node.kind {
            NodeKind::Literal(literal) => js_literal(literal),
            NodeKind::Symbol(name) => match self.lookup(name) {
                Some(id) => id.to_string(),
                None => context_lookup(name),
            },
            NodeKind::Group(inner) => format!("({})", self.compile_expr(inner)?),
            NodeKind::Array(items) => {
                let items = items.iter().map(|i| self.compile_expr(i)).collect::<Result<Vec<_>>>()?;
                format!("[{}]", items.join(", "))
            }
            NodeKind::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = match &key.kind {
                        NodeKind::Literal(literal) => js_literal(literal),
                        _ => format!("[{}]", self.compile_expr(key)?),
                    };
                    entries.push(format!("{key}: {}", self.compile_expr(value)?));
                }
                format!("{{{}}}", entries.join(", "))
            }
            NodeKind::Lookup {
                target,
                key,
            } => {
                let target = self.compile_expr(target)?;
                let key = self.compile_expr(key)?;
                format!("runtime.memberLookup(({target}), {key})")
            }
            NodeKind::FunCall {
                callee,
                args,
                kwargs,
            } => {
                let name = js_string(&callee_display(callee));
                let callee = self.compile_expr(callee)?;
                let args = self.compile_args(args, kwargs)?;
                format!(
                    "(lineno = {}, colno = {}, runtime.callWrap({callee}, {name}, context, [{}]))",
                    node.span.line,
                    node.span.col,
                    args.join(", ")
                )
            }
            NodeKind::Filter {
                name,
                target,
                args,
                kwargs,
            } => self.compile_filter(name, target, args, kwargs)?,
            NodeKind::Is {
                target,
                test,
                args,
                negated,
            } => {
                let mut parts = vec![self.compile_expr(target)?];
                parts.extend(args.iter().map(|a| self.compile_expr(a)).collect::<Result<Vec<_>>>()?);
                let call = format!(
                    "(env.getTest({}).call(context, {}) === true)",
                    js_string(test),
                    parts.join(", ")
                );
                if *negated { format!("!{call}") } else { call }
            }
            NodeKind::Unary {
                op,
                operand,
            } => {
                let operand = self.compile_operand(operand, None)?;
                match op {
                    UnaryOp::Not => format!("!{operand}"),
                    UnaryOp::Neg => format!("-{operand}"),
                    UnaryOp::Pos => format!("+{operand}"),
                }
            }
            NodeKind::Binary {
                op,
                left,
                right,
            } => {
                let l = self.compile_operand(left, Some(*op))?;
                let r = self.compile_operand(right, Some(*op))?;
                match op {
                    BinaryOp::Add => format!("{l} + {r}"),
                    BinaryOp::Sub => format!("{l} - {r}"),
                    BinaryOp::Mul => format!("{l} * {r}"),
                    BinaryOp::Div => format!("{l} / {r}"),
                    BinaryOp::FloorDiv => format!("Math.floor({l} / {r})"),
                    BinaryOp::Mod => format!("{l} % {r}"),
                    BinaryOp::Pow => format!("Math.pow({l}, {r})"),
                    BinaryOp::Concat => format!("\"\" + {l} + {r}"),
                    BinaryOp::And => format!("{l} && {r}"),
                    BinaryOp::Or => format!("{l} || {r}"),
                    BinaryOp::In => format!("runtime.inOperator({l}, {r})"),
                    BinaryOp::NotIn => format!("!runtime.inOperator({l}, {r})"),
                }
            }
            NodeKind::Compare {
                first,
                rest,
            } => {
                let mut code = self.compile_operand(first, None)?;
                for (op, operand) in rest {
                    let operand = self.compile_operand(operand, None)?;
                    code = format!("{code} {} {operand}", compare_op(*op));
                }
                code
            }
            NodeKind::InlineIf {
                cond,
                body,
                else_body,
            } => {
                let cond = self.compile_expr(cond)?;
                let body = self.compile_expr(body)?;
                let else_body = match else_body {
                    Some(e) => self.compile_expr(e)?,
                    None => "\"\"".to_string(),
                };
                format!("({cond} ? {body} : {else_body})")
            }
            NodeKind::CallExtension {
                ext,
                method,
                args,
                kwargs,
                bodies,
                is_async,
            } => self.compile_extension(ext, method, args, kwargs, bodies, *is_async)?,
            NodeKind::Caller {
                params,
                body,
            } => self.compile_macro(params, body, true)?,
            NodeKind::Capture(body) => {
                let closure = self.compile_closure(body)?;
                self.awaited(format!("({closure})()"))
            }
            _ => {
                return Err(self.error(format!(
                    "cannot use {} as an expression at line {}, column {}",
                    node.describe(),
                    node.span.line,
                    node.span.col
                )));
            }
        })
    }
}
