use crate::env::EnvSnapshot;
use std::path::PathBuf;

/// Shell flavours generated script fragments are written for
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellKind {
    /// Windows command interpreter
    Cmd,
    /// C shell family, scripts still run through `/bin/sh`
    CShell,
    /// Bourne shell family with the interpreter scripts are started with
    Bourne(PathBuf),
}

impl ShellKind {
    pub fn detect(env: &EnvSnapshot) -> Self {
        if cfg!(windows) {
            return Self::Cmd;
        }

        match env.get("SHELL").filter(|shell| !shell.is_empty()) {
            Some(shell) if shell.ends_with("csh") => Self::CShell,
            Some(shell) => Self::Bourne(PathBuf::from(shell)),
            None => Self::Bourne(PathBuf::from("/bin/sh")),
        }
    }

    /// Interpreter external commands are run with. C shells get `/bin/sh`,
    /// command lines are written in Bourne syntax.
    pub fn interpreter(&self) -> PathBuf {
        match self {
            Self::Cmd => PathBuf::from("cmd"),
            Self::CShell => PathBuf::from("/bin/sh"),
            Self::Bourne(shell) => shell.clone(),
        }
    }

    pub fn shebang(&self) -> String {
        match self {
            Self::Cmd => "@echo off\n\n".to_string(),
            Self::CShell => "#!/bin/sh\n\n".to_string(),
            Self::Bourne(shell) => format!("#!{}\n\n", shell.display()),
        }
    }

    pub fn comment(&self, text: &str) -> String {
        match self {
            Self::Cmd => format!("rem {text}"),
            Self::CShell | Self::Bourne(_) => format!("# {text}"),
        }
    }

    pub fn export_env(&self, var: &str, value: &str) -> String {
        match self {
            Self::Cmd => format!("set {var}={value}\n"),
            Self::CShell => format!("setenv {var} {value}\n"),
            Self::Bourne(_) => format!("export {var}={value}\n"),
        }
    }

    /// Prepend `path` to a `PATH` like variable. Windows paths are left unquoted,
    /// cmd would keep the quotes as part of the value.
    pub fn prepend_path(&self, var: &str, path: &str) -> String {
        match self {
            Self::Cmd => format!("set {var}={path};%{var}%\n"),
            Self::CShell => format!("setenv {var} \"{path}\":${var}\n"),
            Self::Bourne(_) => format!("export {var}=\"{path}\":${var}\n"),
        }
    }

    pub fn positional_args(&self) -> &'static str {
        match self {
            Self::Cmd => "%*",
            Self::CShell | Self::Bourne(_) => "$@",
        }
    }

    pub fn return_code(&self) -> &'static str {
        match self {
            Self::Cmd => "%ERROR_LEVEL%",
            Self::CShell | Self::Bourne(_) => "$?",
        }
    }
}
