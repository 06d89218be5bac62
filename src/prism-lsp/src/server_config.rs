//! Language server configurations.
//!
//! One canonical builtin table covers the common servers; user entries
//! from `prism.json` override a builtin with the same id and otherwise
//! extend the table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Static description of one language server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Stable identifier, e.g. `"typescript"`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Command and argument vector used to spawn the server.
    pub command: Vec<String>,
    /// File extensions routed to this server.
    pub extensions: Vec<String>,
    /// LSP language identifiers this server understands.
    pub language_ids: Vec<String>,
    /// Extra environment for the subprocess.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// `initializationOptions` passed verbatim in the handshake.
    #[serde(default)]
    pub init_options: serde_json::Value,
    /// Ordered root markers; `*`-prefixed entries are suffix globs.
    #[serde(default)]
    pub root_markers: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl ServerConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: Vec::new(),
            extensions: Vec::new(),
            language_ids: Vec::new(),
            env: HashMap::new(),
            init_options: serde_json::Value::Null,
            root_markers: Vec::new(),
            disabled: false,
        }
    }

    pub fn command(mut self, cmd: Vec<&str>) -> Self {
        self.command = cmd.into_iter().map(String::from).collect();
        self
    }

    pub fn extensions(mut self, exts: Vec<&str>) -> Self {
        self.extensions = exts.into_iter().map(String::from).collect();
        self
    }

    pub fn language_ids(mut self, ids: Vec<&str>) -> Self {
        self.language_ids = ids.into_iter().map(String::from).collect();
        self
    }

    pub fn root_markers(mut self, markers: Vec<&str>) -> Self {
        self.root_markers = markers.into_iter().map(String::from).collect();
        self
    }

    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }
}

lazy_static::lazy_static! {
    pub static ref BUILTIN_SERVERS: Vec<ServerConfig> = vec![
        ServerConfig::new("typescript", "TypeScript Language Server")
            .command(vec!["typescript-language-server", "--stdio"])
            .extensions(vec!["ts", "tsx", "js", "jsx", "mjs", "cjs"])
            .language_ids(vec!["typescript", "typescriptreact", "javascript", "javascriptreact"])
            .root_markers(vec!["tsconfig.json", "jsconfig.json", "package.json", ".git"]),

        ServerConfig::new("rust", "Rust Analyzer")
            .command(vec!["rust-analyzer"])
            .extensions(vec!["rs"])
            .language_ids(vec!["rust"])
            .root_markers(vec!["Cargo.toml", ".git"]),

        ServerConfig::new("python", "Pylsp")
            .command(vec!["pylsp"])
            .extensions(vec!["py", "pyi"])
            .language_ids(vec!["python"])
            .root_markers(vec!["pyproject.toml", "setup.py", "setup.cfg", "requirements.txt", "Pipfile", ".git"]),

        ServerConfig::new("go", "Gopls")
            .command(vec!["gopls"])
            .extensions(vec!["go"])
            .language_ids(vec!["go"])
            .root_markers(vec!["go.work", "go.mod", ".git"]),

        ServerConfig::new("clangd", "Clangd")
            .command(vec!["clangd"])
            .extensions(vec!["c", "cpp", "cc", "cxx", "h", "hpp", "hxx"])
            .language_ids(vec!["c", "cpp"])
            .root_markers(vec!["compile_commands.json", "CMakeLists.txt", "Makefile", ".clangd", ".git"]),

        ServerConfig::new("java", "Eclipse JDT.LS")
            .command(vec!["jdtls"])
            .extensions(vec!["java"])
            .language_ids(vec!["java"])
            .root_markers(vec!["settings.gradle", "pom.xml", "build.gradle", "build.gradle.kts", ".git"]),

        ServerConfig::new("lua", "Lua Language Server")
            .command(vec!["lua-language-server"])
            .extensions(vec!["lua"])
            .language_ids(vec!["lua"])
            .root_markers(vec![".luarc.json", ".luacheckrc", ".git"]),

        ServerConfig::new("yaml", "YAML Language Server")
            .command(vec!["yaml-language-server", "--stdio"])
            .extensions(vec!["yaml", "yml"])
            .language_ids(vec!["yaml"])
            .root_markers(vec![".git"]),

        ServerConfig::new("json", "JSON Language Server")
            .command(vec!["vscode-json-language-server", "--stdio"])
            .extensions(vec!["json", "jsonc"])
            .language_ids(vec!["json", "jsonc"])
            .root_markers(vec!["package.json", ".git"]),

        ServerConfig::new("html", "HTML Language Server")
            .command(vec!["vscode-html-language-server", "--stdio"])
            .extensions(vec!["html", "htm"])
            .language_ids(vec!["html"])
            .root_markers(vec!["package.json", ".git"]),

        ServerConfig::new("css", "CSS Language Server")
            .command(vec!["vscode-css-language-server", "--stdio"])
            .extensions(vec!["css", "scss", "less"])
            .language_ids(vec!["css", "scss", "less"])
            .root_markers(vec!["package.json", ".git"]),

        ServerConfig::new("bash", "Bash Language Server")
            .command(vec!["bash-language-server", "start"])
            .extensions(vec!["sh", "bash", "zsh"])
            .language_ids(vec!["shellscript"])
            .root_markers(vec![".git"]),

        ServerConfig::new("zig", "Zig Language Server")
            .command(vec!["zls"])
            .extensions(vec!["zig"])
            .language_ids(vec!["zig"])
            .root_markers(vec!["build.zig", "build.zig.zon", ".git"]),

        ServerConfig::new("elixir", "ElixirLS")
            .command(vec!["elixir-ls"])
            .extensions(vec!["ex", "exs"])
            .language_ids(vec!["elixir"])
            .root_markers(vec!["mix.exs", ".git"]),

        ServerConfig::new("markdown", "Marksman")
            .command(vec!["marksman", "server"])
            .extensions(vec!["md", "markdown"])
            .language_ids(vec!["markdown"])
            .root_markers(vec![".git"]),

        ServerConfig::new("toml", "Taplo TOML Language Server")
            .command(vec!["taplo", "lsp", "stdio"])
            .extensions(vec!["toml"])
            .language_ids(vec!["toml"])
            .root_markers(vec!["Cargo.toml", "pyproject.toml", ".git"]),

        ServerConfig::new("csharp", "C# Language Server")
            .command(vec!["csharp-ls"])
            .extensions(vec!["cs"])
            .language_ids(vec!["csharp"])
            .root_markers(vec!["*.sln", "*.csproj", ".git"]),
    ];
}

/// Builtin servers plus user overrides, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    configs: Vec<ServerConfig>,
}

impl ServerRegistry {
    pub fn builtin() -> Self {
        Self { configs: BUILTIN_SERVERS.clone() }
    }

    /// A user entry with a builtin id replaces that builtin; any other
    /// entry extends the table. Extension lookups prefer user entries.
    pub fn with_overrides(user: &[ServerConfig]) -> Self {
        let mut configs: Vec<ServerConfig> = user.to_vec();
        for builtin in BUILTIN_SERVERS.iter() {
            if !user.iter().any(|u| u.id == builtin.id) {
                configs.push(builtin.clone());
            }
        }
        Self { configs }
    }

    pub fn config_for_extension(&self, ext: &str) -> Option<&ServerConfig> {
        self.configs.iter().find(|c| !c.disabled && c.matches_extension(ext))
    }

    pub fn config_for_path(&self, path: &Path) -> Option<&ServerConfig> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        self.config_for_extension(ext)
    }

    pub fn config_by_id(&self, id: &str) -> Option<&ServerConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    pub fn all(&self) -> &[ServerConfig] {
        &self.configs
    }
}

/// LSP language identifier for a file, by extension.
pub fn language_id_for_path(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "cpp",
        "java" => "java",
        "lua" => "lua",
        "yaml" | "yml" => "yaml",
        "json" | "jsonc" => "json",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "sh" | "bash" | "zsh" => "shellscript",
        "zig" => "zig",
        "ex" | "exs" => "elixir",
        "md" | "markdown" => "markdown",
        "toml" => "toml",
        "cs" => "csharp",
        _ => "plaintext",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builtin_lookup_by_extension() {
        let registry = ServerRegistry::builtin();
        assert_eq!(registry.config_for_extension("rs").unwrap().id, "rust");
        assert_eq!(registry.config_for_extension("tsx").unwrap().id, "typescript");
        assert!(registry.config_for_extension("unknownext").is_none());
    }

    #[test]
    fn user_config_overrides_builtin_of_same_id() {
        let custom = ServerConfig::new("rust", "Custom RA")
            .command(vec!["/opt/ra/rust-analyzer"])
            .extensions(vec!["rs"])
            .language_ids(vec!["rust"]);
        let registry = ServerRegistry::with_overrides(&[custom]);

        let config = registry.config_by_id("rust").unwrap();
        assert_eq!(config.name, "Custom RA");
        assert_eq!(config.command[0], "/opt/ra/rust-analyzer");
        // Other builtins survive.
        assert!(registry.config_by_id("python").is_some());
    }

    #[test]
    fn disabled_servers_do_not_match_extensions() {
        let mut custom = ServerConfig::new("rust", "Rust Analyzer")
            .command(vec!["rust-analyzer"])
            .extensions(vec!["rs"]);
        custom.disabled = true;
        let registry = ServerRegistry::with_overrides(&[custom]);
        assert!(registry.config_for_extension("rs").is_none());
    }

    #[test]
    fn language_ids_fall_back_to_plaintext() {
        assert_eq!(language_id_for_path(&PathBuf::from("/a/b.rs")), "rust");
        assert_eq!(language_id_for_path(&PathBuf::from("/a/b.unknownext")), "plaintext");
        assert_eq!(language_id_for_path(&PathBuf::from("/a/noext")), "plaintext");
    }
}
