//! Command rendering for the two shells the orchestrator drives.
//!
//! POSIX commands go to `sh` as-is. PowerShell scripts are wrapped in a
//! `powershell -Command "..."` invocation because Windows OpenSSH starts `cmd.exe`.

use super::OsFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellDialect {
    Posix,
    PowerShell,
}

impl From<OsFamily> for ShellDialect {
    fn from(os: OsFamily) -> Self {
        match os {
            OsFamily::Linux => ShellDialect::Posix,
            OsFamily::Windows => ShellDialect::PowerShell,
        }
    }
}

/// `C:\...`, `C:/...` or a UNC path.
pub fn is_windows_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    let drive = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    drive || path.starts_with("\\\\")
}

/// Shell dialect a bare path implies, for operations that run before OS detection.
pub fn dialect_for_path(path: &str) -> ShellDialect {
    if is_windows_path(path) {
        ShellDialect::PowerShell
    } else {
        ShellDialect::Posix
    }
}

/// Joins a file name onto a directory, keeping the directory's separator style.
pub fn join(dir: &str, name: &str) -> String {
    let separator = if dir.contains('\\') { '\\' } else { '/' };
    let dir = dir.trim_end_matches(|c| c == '/' || c == '\\');
    let name = name.trim_start_matches(|c| c == '/' || c == '\\');
    if dir.is_empty() && separator == '/' {
        format!("/{}", name)
    } else {
        format!("{}{}{}", dir, separator, name)
    }
}

impl ShellDialect {
    pub fn quote(&self, value: &str) -> String {
        match self {
            ShellDialect::Posix => format!("'{}'", value.replace('\'', r"'\''")),
            ShellDialect::PowerShell => format!("'{}'", value.replace('\'', "''")),
        }
    }

    fn powershell(script: &str) -> String {
        format!(
            "powershell -NoProfile -NonInteractive -Command \"{}\"",
            script.replace('"', "\\\"")
        )
    }

    pub fn mkdir_all(&self, dir: &str) -> String {
        match self {
            ShellDialect::Posix => format!("mkdir -p {}", self.quote(dir)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "New-Item -ItemType Directory -Force -Path {} | Out-Null",
                self.quote(dir)
            )),
        }
    }

    /// Prints `yes` when `path` exists as a regular file, `no` otherwise.
    pub fn file_exists(&self, path: &str) -> String {
        match self {
            ShellDialect::Posix => {
                format!("if [ -f {} ]; then echo yes; else echo no; fi", self.quote(path))
            }
            ShellDialect::PowerShell => Self::powershell(&format!(
                "if (Test-Path -LiteralPath {} -PathType Leaf) {{ 'yes' }} else {{ 'no' }}",
                self.quote(path)
            )),
        }
    }

    /// Prints `yes` when `path` exists as a directory, `no` otherwise.
    pub fn dir_exists(&self, path: &str) -> String {
        match self {
            ShellDialect::Posix => {
                format!("if [ -d {} ]; then echo yes; else echo no; fi", self.quote(path))
            }
            ShellDialect::PowerShell => Self::powershell(&format!(
                "if (Test-Path -LiteralPath {} -PathType Container) {{ 'yes' }} else {{ 'no' }}",
                self.quote(path)
            )),
        }
    }

    pub fn move_file(&self, from: &str, to: &str) -> String {
        match self {
            ShellDialect::Posix => format!("mv -f {} {}", self.quote(from), self.quote(to)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Move-Item -Force -LiteralPath {} -Destination {}",
                self.quote(from),
                self.quote(to)
            )),
        }
    }

    pub fn remove_file(&self, path: &str) -> String {
        match self {
            ShellDialect::Posix => format!("rm -f {}", self.quote(path)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Remove-Item -Force -LiteralPath {}",
                self.quote(path)
            )),
        }
    }

    /// Zips `parent/dir_name` into `archive`, entries rooted at `dir_name`.
    pub fn zip_dir(&self, parent: &str, dir_name: &str, archive: &str) -> String {
        match self {
            ShellDialect::Posix => format!(
                "cd {} && zip -r -q {} {}",
                self.quote(parent),
                self.quote(archive),
                self.quote(dir_name)
            ),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Compress-Archive -Force -Path {} -DestinationPath {}",
                self.quote(&join(parent, dir_name)),
                self.quote(archive)
            )),
        }
    }

    /// Expands `archive` into `dest`, overwriting existing files.
    pub fn unzip(&self, archive: &str, dest: &str) -> String {
        match self {
            ShellDialect::Posix => {
                format!("unzip -o -q {} -d {}", self.quote(archive), self.quote(dest))
            }
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Expand-Archive -Force -LiteralPath {} -DestinationPath {}",
                self.quote(archive),
                self.quote(dest)
            )),
        }
    }

    /// One file name per line, most recently modified first.
    pub fn list_newest_first(&self, dir: &str) -> String {
        match self {
            ShellDialect::Posix => format!("ls -1t {}", self.quote(dir)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Get-ChildItem -LiteralPath {} -File | Sort-Object LastWriteTime -Descending | ForEach-Object {{ $_.Name }}",
                self.quote(dir)
            )),
        }
    }

    /// Runs an operator-supplied command with `dir` as working directory.
    pub fn in_dir(&self, dir: &str, command: &str) -> String {
        match self {
            ShellDialect::Posix => format!("cd {} && {}", self.quote(dir), command),
            ShellDialect::PowerShell => format!("cd /d \"{}\" && {}", dir, command),
        }
    }

    pub fn tail_follow(&self, path: &str, lines: u32) -> String {
        match self {
            ShellDialect::Posix => format!("tail -n {} -F {}", lines, self.quote(path)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "Get-Content -LiteralPath {} -Tail {} -Wait",
                self.quote(path),
                lines
            )),
        }
    }

    /// Writes everything arriving on stdin to `path`.
    pub fn write_stdin_to(&self, path: &str) -> String {
        match self {
            ShellDialect::Posix => format!("cat > {}", self.quote(path)),
            ShellDialect::PowerShell => Self::powershell(&format!(
                "$in = [Console]::OpenStandardInput(); $out = [IO.File]::Create({}); $in.CopyTo($out); $out.Close()",
                self.quote(path)
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_quote_escapes_single_quotes() {
        assert_eq!(ShellDialect::Posix.quote("/opt/it's"), r"'/opt/it'\''s'");
        assert_eq!(ShellDialect::PowerShell.quote("C:\\it's"), "'C:\\it''s'");
    }

    #[test]
    fn join_keeps_separator_style() {
        assert_eq!(join("/opt/app/", "app.jar"), "/opt/app/app.jar");
        assert_eq!(join("C:\\apps\\svc", "svc.jar"), "C:\\apps\\svc\\svc.jar");
        assert_eq!(join("C:/apps/svc", "svc.jar"), "C:/apps/svc/svc.jar");
    }

    #[test]
    fn windows_paths_are_recognised() {
        assert!(is_windows_path("C:\\apps"));
        assert!(is_windows_path("d:/apps"));
        assert!(is_windows_path("\\\\share\\apps"));
        assert!(!is_windows_path("/opt/app"));
        assert_eq!(dialect_for_path("/var/log/app.log"), ShellDialect::Posix);
    }

    #[test]
    fn posix_commands_render() {
        let sh = ShellDialect::Posix;
        assert_eq!(sh.mkdir_all("/opt/app"), "mkdir -p '/opt/app'");
        assert_eq!(
            sh.move_file("/opt/app/app.jar_new", "/opt/app/app.jar"),
            "mv -f '/opt/app/app.jar_new' '/opt/app/app.jar'"
        );
        assert_eq!(sh.in_dir("/opt/app", "./restart.sh"), "cd '/opt/app' && ./restart.sh");
        assert_eq!(
            sh.zip_dir("/srv/web", "dist", "/srv/backup/dist2410181530.zip"),
            "cd '/srv/web' && zip -r -q '/srv/backup/dist2410181530.zip' 'dist'"
        );
    }

    #[test]
    fn powershell_scripts_are_wrapped_for_cmd() {
        let ps = ShellDialect::PowerShell;
        let cmd = ps.move_file("C:\\svc\\svc.jar", "C:\\svc\\svc2410181530.jar");
        assert!(cmd.starts_with("powershell -NoProfile -NonInteractive -Command \""));
        assert!(cmd.contains("Move-Item -Force -LiteralPath 'C:\\svc\\svc.jar'"));
        assert!(cmd.ends_with('"'));
        assert_eq!(ps.in_dir("C:\\svc", "net start svc"), "cd /d \"C:\\svc\" && net start svc");
    }
}
