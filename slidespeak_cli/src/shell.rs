use crate::api::{self, GenerateRequest, Metadata, MetadataKind, Replacement, SlideApi};
use crate::deck::{self, Deck};
use crate::poller::{self, Poller};
use crate::render;
use crate::store::JobLog;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Terminal I/O failures end the session; application errors are shown
/// and the menu comes back.
#[derive(Error, Debug)]
enum ShellError {
    #[error(transparent)]
    App(#[from] crate::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

type ActionResult = std::result::Result<Flow, ShellError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ViewLog,
    ViewThemes,
    Generate,
    WhoAmI,
    Inspect,
    Edit,
    Download,
    Exit,
}

const MENU: [(Action, &str); 8] = [
    (Action::ViewLog, "View presentation log"),
    (Action::ViewThemes, "View themes"),
    (Action::Generate, "Generate a presentation"),
    (Action::WhoAmI, "Who am I"),
    (Action::Inspect, "Show a presentation (slides and shapes)"),
    (Action::Edit, "Edit a presentation"),
    (Action::Download, "Download a presentation"),
    (Action::Exit, "Exit"),
];

/// Menu-driven front end over the API, the poll loop and the job log.
pub struct Shell<'a, R, W> {
    api: &'a dyn SlideApi,
    log: &'a JobLog,
    poller: &'a Poller,
    default_length: u32,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Shell<'a, R, W> {
    pub fn new(
        api: &'a dyn SlideApi,
        log: &'a JobLog,
        poller: &'a Poller,
        default_length: u32,
        input: R,
        output: W,
    ) -> Self {
        Self {
            api,
            log,
            poller,
            default_length,
            input,
            output,
        }
    }

    /// Runs until the user picks Exit or input ends. Only terminal I/O
    /// failures end the session early; everything else is reported and the
    /// menu is shown again.
    pub async fn run(&mut self) -> io::Result<()> {
        writeln!(self.output, "SlideSpeak Presentation Generator")?;
        loop {
            self.print_menu()?;
            let Some(choice) = self.ask("Choose an action: ")? else {
                break;
            };
            let Some(action) = parse_choice(&choice) else {
                writeln!(self.output, "Unknown choice: {choice}")?;
                continue;
            };

            let result = match action {
                Action::ViewLog => self.view_log(),
                Action::ViewThemes => self.view_metadata(MetadataKind::Themes).await,
                Action::WhoAmI => self.view_metadata(MetadataKind::User).await,
                Action::Generate => self.generate().await,
                Action::Inspect => self.inspect().await,
                Action::Edit => self.edit().await,
                Action::Download => self.download().await,
                Action::Exit => break,
            };
            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::EndOfInput) => break,
                Err(ShellError::Io(e)) => return Err(e),
                Err(ShellError::App(e)) => {
                    tracing::debug!(error = ?e, "action failed");
                    writeln!(self.output, "Error: {e}")?;
                }
            }
        }
        writeln!(self.output, "Goodbye!")?;
        Ok(())
    }

    fn print_menu(&mut self) -> io::Result<()> {
        writeln!(self.output)?;
        for (i, (_, label)) in MENU.iter().enumerate() {
            writeln!(self.output, "  {}. {label}", i + 1)?;
        }
        Ok(())
    }

    /// Prompts and reads one trimmed line; `None` on end of input.
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn view_log(&mut self) -> ActionResult {
        let records = self.log.list_all()?;
        write_out(&mut self.output, &render::job_table(&records))?;
        Ok(Flow::Continue)
    }

    async fn view_metadata(&mut self, kind: MetadataKind) -> ActionResult {
        let text = match self.api.fetch_metadata(kind).await? {
            Metadata::User(user) => user.to_string(),
            Metadata::Themes(themes) => render::theme_list(&themes),
        };
        write_out(&mut self.output, &text)?;
        Ok(Flow::Continue)
    }

    async fn generate(&mut self) -> ActionResult {
        let Some(prompt) = self.ask("Describe the presentation: ")? else {
            return Ok(Flow::EndOfInput);
        };
        if prompt.is_empty() {
            write_out(&mut self.output, "A prompt is required.\n")?;
            return Ok(Flow::Continue);
        }
        let Some(theme) = self.ask("Theme (blank for none): ")? else {
            return Ok(Flow::EndOfInput);
        };
        let Some(length) = self.ask(&format!(
            "Number of slides (blank for {}): ",
            self.default_length
        ))?
        else {
            return Ok(Flow::EndOfInput);
        };
        let length = if length.is_empty() {
            self.default_length
        } else {
            match length.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    write_out(&mut self.output, &format!("Invalid slide count: {length}\n"))?;
                    return Ok(Flow::Continue);
                }
            }
        };

        let request = GenerateRequest {
            plain_text: prompt,
            theme: Some(theme).filter(|t| !t.is_empty()),
            length,
        };

        write_out(&mut self.output, "Generating presentation...\n")?;
        let task_id = poller::submit(self.api, self.log, &request).await?;
        write_out(
            &mut self.output,
            &format!("Task ID: {task_id}\nPolling for completion...\n"),
        )?;

        // The observer cannot fail the poll loop; its first write error is
        // surfaced once polling stops.
        let out = &mut self.output;
        let mut write_err: Option<io::Error> = None;
        let outcome = self
            .poller
            .run(self.api, self.log, &task_id, &request.plain_text, |status| {
                if write_err.is_none() {
                    if let Err(e) = writeln!(out, "Status: {}", status.task_status) {
                        write_err = Some(e);
                    }
                }
            })
            .await;
        if let Some(e) = write_err {
            return Err(ShellError::Io(e));
        }
        write_out(&mut self.output, &render::poll_outcome(&task_id, &outcome?))?;
        Ok(Flow::Continue)
    }

    async fn inspect(&mut self) -> ActionResult {
        let Some(source) = self.ask("Presentation file or URL: ")? else {
            return Ok(Flow::EndOfInput);
        };
        if source.is_empty() {
            write_out(&mut self.output, "A file or URL is required.\n")?;
            return Ok(Flow::Continue);
        }
        let deck = deck::load(self.api, &source).await?;
        write_out(&mut self.output, &render::slide_listing(&deck))?;

        let Some(json_path) = self.ask("Save as JSON (blank to skip): ")? else {
            return Ok(Flow::EndOfInput);
        };
        if !json_path.is_empty() {
            deck.save_json(Path::new(&json_path))?;
            write_out(
                &mut self.output,
                &format!("JSON content saved to '{json_path}'.\n"),
            )?;
        }
        Ok(Flow::Continue)
    }

    async fn edit(&mut self) -> ActionResult {
        let Some(file) = self.ask("Presentation file (.pptx): ")? else {
            return Ok(Flow::EndOfInput);
        };
        if file.is_empty() {
            write_out(&mut self.output, "A file is required.\n")?;
            return Ok(Flow::Continue);
        }
        let path = PathBuf::from(file);
        let deck = Deck::open(&path)?;
        write_out(&mut self.output, &render::slide_listing(&deck))?;

        let mut replacements = Vec::new();
        loop {
            let Some(shape_name) = self.ask("Shape to change (blank to finish): ")? else {
                return Ok(Flow::EndOfInput);
            };
            if shape_name.is_empty() {
                break;
            }
            if !deck.has_shape(&shape_name) {
                write_out(&mut self.output, &format!("Unknown shape: {shape_name}\n"))?;
                continue;
            }
            let Some(content) = self.ask(&format!("New content for '{shape_name}': "))? else {
                return Ok(Flow::EndOfInput);
            };
            replacements.push(Replacement {
                shape_name,
                content,
            });
        }
        if replacements.is_empty() {
            write_out(&mut self.output, "No edits made.\n")?;
            return Ok(Flow::Continue);
        }

        write_out(&mut self.output, "Sending edits to the presentation...\n")?;
        let url = self.api.edit(&path, &replacements).await?;
        write_out(
            &mut self.output,
            &format!("Edits applied. New presentation available at: {url}\n"),
        )?;
        Ok(Flow::Continue)
    }

    async fn download(&mut self) -> ActionResult {
        let Some(url) = self.ask("Presentation URL: ")? else {
            return Ok(Flow::EndOfInput);
        };
        if url.is_empty() {
            write_out(&mut self.output, "A URL is required.\n")?;
            return Ok(Flow::Continue);
        }
        let Some(dest) = self.ask("Save as (blank for a generated name): ")? else {
            return Ok(Flow::EndOfInput);
        };
        let dest = Some(dest).filter(|d| !d.is_empty()).map(PathBuf::from);

        write_out(&mut self.output, "Downloading presentation...\n")?;
        let saved = api::download(self.api, &url, dest).await?;
        write_out(&mut self.output, &format!("Saved to {}\n", saved.display()))?;
        Ok(Flow::Continue)
    }
}

enum Flow {
    Continue,
    EndOfInput,
}

fn write_out<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())
}

fn parse_choice(choice: &str) -> Option<Action> {
    if let Ok(n) = choice.parse::<usize>() {
        return MENU.get(n.checked_sub(1)?).map(|(action, _)| *action);
    }
    let lowered = choice.to_lowercase();
    match lowered.as_str() {
        "log" | "view log" => Some(Action::ViewLog),
        "themes" => Some(Action::ViewThemes),
        "generate" | "new" => Some(Action::Generate),
        "me" | "whoami" | "who am i" => Some(Action::WhoAmI),
        "show" | "slides" | "inspect" => Some(Action::Inspect),
        "edit" => Some(Action::Edit),
        "download" => Some(Action::Download),
        "exit" | "quit" | "q" => Some(Action::Exit),
        _ => None,
    }
}
