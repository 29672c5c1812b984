//! Dockerfile rendering
//!
//! Each build attempt gets a fresh multi-stage Dockerfile:
//!
//! 1. `build` stage on the base image: dependency trees are copied from named
//!    contexts, the recipe runs and installs into the prefix.
//! 2. `export` stage `FROM scratch` holding only the prefix, which the engine
//!    writes to the staging directory.

use crate::config::defaults;
use crate::core::component::RecipeKind;
use crate::core::plan::ResolvedNode;
use crate::core::target::Target;

/// Named context carrying the component's source tree
pub const SOURCE_CONTEXT: &str = "source";

/// Named context for a dependency's artifact tree
pub fn dependency_context(name: &str) -> String {
    format!("dep-{name}")
}

/// Values for recipe placeholders
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub prefix: String,
    pub sysroot: String,
    pub target: String,
    pub arch: String,
    pub kernel_arch: String,
    pub jobs: usize,
    pub name: String,
    pub version: String,
}

impl Placeholders {
    /// Placeholders for a node
    pub fn for_node(node: &ResolvedNode, target: &Target, jobs: usize) -> Self {
        Self {
            prefix: defaults::CONTAINER_PREFIX.to_string(),
            sysroot: format!("{}/rootfs", defaults::CONTAINER_PREFIX),
            target: target.triplet(),
            arch: target.arch.clone(),
            kernel_arch: target.kernel_arch().to_string(),
            jobs,
            name: node.name().to_string(),
            version: node.version.to_string(),
        }
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "prefix" => Some(self.prefix.clone()),
            "sysroot" => Some(self.sysroot.clone()),
            "target" => Some(self.target.clone()),
            "arch" => Some(self.arch.clone()),
            "kernel_arch" => Some(self.kernel_arch.clone()),
            "jobs" => Some(self.jobs.to_string()),
            "name" => Some(self.name.clone()),
            "version" => Some(self.version.clone()),
            _ => None,
        }
    }

    /// Replace `{key}` placeholders
    ///
    /// Unknown keys and shell expansions such as `${prefix}` are left alone.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let (before, after) = rest.split_at(open);
            out.push_str(before);

            let shell_var = before.ends_with('$');
            let replaced = after[1..].find('}').and_then(|close| {
                let key = &after[1..=close];
                (!shell_var)
                    .then(|| self.lookup(key))
                    .flatten()
                    .map(|value| (value, close + 2))
            });

            match replaced {
                Some((value, consumed)) => {
                    out.push_str(&value);
                    rest = &after[consumed..];
                }
                None => {
                    out.push('{');
                    rest = &after[1..];
                }
            }
        }

        out.push_str(rest);
        out
    }
}

/// Everything needed to render one build's Dockerfile
#[derive(Debug, Clone)]
pub struct BuildDockerfile<'a> {
    /// Node to build
    pub node: &'a ResolvedNode,
    /// Plan target
    pub target: &'a Target,
    /// Base image unless the recipe overrides it
    pub base_image: &'a str,
    /// Parallel jobs inside the build
    pub jobs: usize,
    /// Whether a source context is supplied
    pub has_source: bool,
}

/// Quote a value for `ENV`
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn join_args(args: &[String]) -> String {
    args.iter()
        .map(|a| a.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl BuildDockerfile<'_> {
    /// Recipe commands, placeholders not yet expanded
    fn recipe_commands(&self) -> Vec<String> {
        let spec = &self.node.spec;
        let src = defaults::CONTAINER_SOURCE_DIR;
        let build = defaults::CONTAINER_BUILD_DIR;
        let configure = join_args(&spec.flags.configure);
        let make = join_args(&spec.flags.make);
        let install = join_args(&spec.recipe.install_targets);

        let with_args = |base: String, args: &str| {
            if args.is_empty() {
                base
            } else {
                format!("{base} {args}")
            }
        };

        let mut commands = match spec.recipe.kind {
            RecipeKind::Autotools => vec![
                with_args(format!("{src}/configure --prefix={{prefix}}"), &configure),
                with_args("make -j{jobs}".to_string(), &make),
                with_args(with_args("make".to_string(), &make), &install),
            ],
            RecipeKind::Make => vec![
                with_args(format!("make -C {src} -j{{jobs}} PREFIX={{prefix}}"), &make),
                with_args(
                    with_args(format!("make -C {src} PREFIX={{prefix}}"), &make),
                    &install,
                ),
            ],
            RecipeKind::Cmake => vec![
                with_args(
                    format!("cmake -S {src} -B {build} -DCMAKE_INSTALL_PREFIX={{prefix}}"),
                    &configure,
                ),
                with_args(format!("cmake --build {build} -j {{jobs}}"), &make),
                format!("cmake --install {build}"),
            ],
            RecipeKind::Script => Vec::new(),
        };

        commands.extend(spec.recipe.steps.iter().cloned());
        commands
    }

    /// Render the Dockerfile
    pub fn render(&self) -> String {
        let spec = &self.node.spec;
        let placeholders = Placeholders::for_node(self.node, self.target, self.jobs);
        let base = spec.recipe.base_image.as_deref().unwrap_or(self.base_image);
        let prefix = defaults::CONTAINER_PREFIX;
        let deps_dir = defaults::CONTAINER_DEPS_DIR;

        let mut lines = vec![
            format!("# {} ({})", self.node.id(), self.node.hash),
            format!("FROM {base} AS build"),
        ];

        for dep in &self.node.dependencies {
            lines.push(format!(
                "COPY --from={} / {deps_dir}/{}/",
                dependency_context(&dep.name),
                dep.name
            ));
        }
        if self.has_source {
            lines.push(format!(
                "COPY --from={SOURCE_CONTEXT} / {}/",
                defaults::CONTAINER_SOURCE_DIR
            ));
        }

        let mut env: Vec<(String, String)> = vec![
            ("WEAVER_TARGET".into(), placeholders.target.clone()),
            ("WEAVER_PREFIX".into(), prefix.to_string()),
            ("WEAVER_SYSROOT".into(), placeholders.sysroot.clone()),
        ];
        if !self.node.dependencies.is_empty() {
            let bins: Vec<String> = self
                .node
                .dependencies
                .iter()
                .map(|d| format!("{deps_dir}/{}/bin", d.name))
                .collect();
            let libs: Vec<String> = self
                .node
                .dependencies
                .iter()
                .map(|d| format!("{deps_dir}/{}/lib", d.name))
                .collect();
            env.push(("PATH".into(), format!("{}:$PATH", bins.join(":"))));
            env.push(("LD_LIBRARY_PATH".into(), libs.join(":")));
        }
        for (key, flags) in [
            ("CFLAGS", &spec.flags.cflags),
            ("CXXFLAGS", &spec.flags.cxxflags),
            ("LDFLAGS", &spec.flags.ldflags),
        ] {
            let joined = join_args(flags);
            if !joined.is_empty() {
                env.push((key.into(), placeholders.expand(&joined)));
            }
        }
        for (key, value) in &spec.flags.env {
            env.push((key.clone(), placeholders.expand(value)));
        }

        for (key, value) in &env {
            if key == "PATH" {
                // `$PATH` must expand, so it stays unquoted
                lines.push(format!("ENV {key}={value}"));
            } else {
                lines.push(format!("ENV {key}={}", quote(value)));
            }
        }

        lines.extend(
            spec.recipe
                .setup
                .iter()
                .map(|command| format!("RUN {}", placeholders.expand(command))),
        );

        lines.push(format!(
            "RUN mkdir -p {prefix}/bin {prefix}/lib {prefix}/rootfs {}",
            defaults::CONTAINER_BUILD_DIR
        ));
        lines.push(format!("WORKDIR {}", defaults::CONTAINER_BUILD_DIR));

        lines.extend(
            self.recipe_commands()
                .iter()
                .map(|command| format!("RUN {}", placeholders.expand(command))),
        );

        lines.push(String::new());
        lines.push("FROM scratch AS export".to_string());
        lines.push(format!("COPY --from=build {prefix}/ /"));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Dockerfile for a runtime image made of an assembled `rootfs/`
pub fn runtime_image() -> String {
    "FROM scratch\nCOPY rootfs/ /\n".to_string()
}
