mod cli;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write as _};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use env_logger::Env;

use cli::{AttributeAction, AttributeArgs, Cli, Command, LinkAction};
use tasktree::config::Config;
use tasktree::csv_io;
use tasktree::model::{AttributeId, AttributeKind, NewTask, TaskEdit, TaskId};
use tasktree::output::{self, Labels, TaskDetail, TaskFilter};
use tasktree::store::TaskStore;

fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn resolve(store: &TaskStore, kind: AttributeKind, name: Option<&str>) -> Result<Option<AttributeId>> {
    name.map(|n| store.resolve_attribute(kind, n).map(|a| a.id))
        .transpose()
        .map_err(Into::into)
}

fn resolve_all(store: &TaskStore, attrs: &AttributeArgs) -> Result<[Option<AttributeId>; 3]> {
    Ok([
        resolve(store, AttributeKind::Category, attrs.category.as_deref())?,
        resolve(store, AttributeKind::Priority, attrs.priority.as_deref())?,
        resolve(store, AttributeKind::Status, attrs.status.as_deref())?,
    ])
}

fn output_writer(path: Option<&Path>) -> Result<Box<dyn io::Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("failed to create {}", p.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        let store_error = e.chain().find_map(|c| c.downcast_ref::<tasktree::Error>());
        if store_error.is_some_and(tasktree::Error::rolled_back) {
            eprintln!("note: the change was rolled back, nothing was saved");
        }
        std::process::exit(store_error.map_or(1, tasktree::Error::exit_code));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let db_path = config.db_path(cli.db.as_deref());
    ensure_db_dir(&db_path)?;
    let mut store = TaskStore::open(config, &db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    match cli.command {
        Command::Init => {
            eprintln!("Initialized {}", db_path.display());
        }

        Command::Add {
            title,
            parent,
            position,
            desc,
            attrs,
            due,
        } => {
            let [category, priority, status] = resolve_all(&store, &attrs)?;
            let id = store.create_task(NewTask {
                title: title.clone(),
                description: desc,
                parent: parent.map(TaskId),
                position,
                category,
                priority,
                status,
                due_date: due.as_deref().map(parse_date).transpose()?,
                completed_at: None,
            })?;
            println!("{}", id.0);
            eprintln!("Added task {id} '{title}'");
        }

        Command::Mv {
            id,
            parent,
            position,
        } => {
            store.move_task(TaskId(id), parent.map(TaskId), position.unwrap_or(usize::MAX))?;
            match parent {
                Some(p) => eprintln!("Moved #{id} under #{p}"),
                None => eprintln!("Moved #{id} to root level"),
            }
        }

        Command::Rm {
            id,
            cascade,
            keep_children,
        } => {
            let cascade = cascade || (!keep_children && store.config().tasks.cascade_delete);
            let removed = store.remove_task(TaskId(id), cascade)?;
            eprintln!("Removed {} task(s)", removed.len());
        }

        Command::Edit {
            id,
            title,
            desc,
            attrs,
            no_category,
            due,
            no_due,
        } => {
            let [category, priority, status] = resolve_all(&store, &attrs)?;
            let edit = TaskEdit {
                title,
                description: desc,
                category: if no_category { Some(None) } else { category.map(Some) },
                priority: priority.map(Some),
                status: status.map(Some),
                due_date: if no_due {
                    Some(None)
                } else {
                    due.as_deref().map(parse_date).transpose()?.map(Some)
                },
                completed_at: None,
            };
            if edit.is_empty() {
                bail!("nothing to change");
            }
            store.edit_task(TaskId(id), edit)?;
            eprintln!("Updated #{id}");
        }

        Command::Show { id, json } => {
            let id = TaskId(id);
            let task = store
                .task(id)
                .ok_or(tasktree::Error::TaskNotFound(id))?;
            let links = store.links(id)?;
            if json {
                let detail = TaskDetail {
                    task,
                    links: &links,
                    children: store.tree().children(Some(id)),
                };
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                let labels = Labels::load(&store)?;
                print!("{}", output::format_task_detail(task, &labels, &links, store.tree()));
            }
        }

        Command::List {
            tree,
            root,
            view,
            status,
            json,
        } => {
            let root = root.map(TaskId);
            if let Some(r) = root {
                if !store.tree().contains(r) {
                    return Err(tasktree::Error::TaskNotFound(r).into());
                }
            }
            let labels = Labels::load(&store)?;
            let filter = TaskFilter {
                view,
                status: resolve(&store, AttributeKind::Status, status.as_deref())?,
            };
            let tasks: Vec<_> = match root {
                Some(r) => store
                    .tree()
                    .get(r)
                    .into_iter()
                    .chain(store.tree().descendants(r))
                    .collect(),
                None => store.tree().walk().collect(),
            };
            let matching = tasks.into_iter().filter(|t| filter.matches(t, &labels));
            if json {
                let matching: Vec<_> = matching.collect();
                println!("{}", serde_json::to_string_pretty(&matching)?);
            } else if tree {
                print!("{}", output::format_task_tree(store.tree(), &labels, root, &filter));
            } else {
                print!("{}", output::format_task_list(matching, &labels));
            }
        }

        Command::Category { action } => run_attribute(&mut store, AttributeKind::Category, action)?,
        Command::Priority { action } => run_attribute(&mut store, AttributeKind::Priority, action)?,
        Command::Status { action } => run_attribute(&mut store, AttributeKind::Status, action)?,

        Command::Link { action } => match action {
            LinkAction::Add { task, url, label } => {
                let link = store.add_link(TaskId(task), &url, label.as_deref())?;
                println!("{}", link.id);
            }
            LinkAction::List { task } => {
                print!("{}", output::format_links(&store.links(TaskId(task))?));
            }
            LinkAction::Rm { id } => {
                if !store.remove_link(id)? {
                    bail!("link {id} not found");
                }
                eprintln!("Removed link {id}");
            }
        },

        Command::Export { path } => {
            let mut out = output_writer(path.as_deref())?;
            let count = csv_io::export(&store, &mut out)?;
            out.flush()?;
            eprintln!("Exported {count} task(s)");
        }

        Command::Import { path } => {
            let file =
                File::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
            let created = csv_io::import(&mut store, BufReader::new(file))
                .with_context(|| format!("failed to import {}", path.display()))?;
            eprintln!("Imported {} task(s)", created.len());
        }

        Command::Template { path } => {
            let mut out = output_writer(path.as_deref())?;
            csv_io::write_template(&mut out)?;
            out.flush()?;
        }
    }

    Ok(())
}

fn run_attribute(store: &mut TaskStore, kind: AttributeKind, action: AttributeAction) -> Result<()> {
    match action {
        AttributeAction::List { json } => {
            let attrs = store.attributes(kind)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&attrs)?);
            } else {
                print!("{}", output::format_attributes(&attrs));
            }
        }
        AttributeAction::Add { name, color } => {
            let attr = store.add_attribute(kind, &name, &color)?;
            eprintln!("Added {kind} '{}'", attr.name);
        }
        AttributeAction::Rename { name, new_name } => {
            let attr = store.resolve_attribute(kind, &name)?;
            store.rename_attribute(kind, attr.id, &new_name)?;
            eprintln!("Renamed {kind} '{name}' to '{new_name}'");
        }
        AttributeAction::Color { name, color } => {
            let attr = store.resolve_attribute(kind, &name)?;
            store.set_attribute_color(kind, attr.id, &color)?;
        }
        AttributeAction::Move { name, position } => {
            let attr = store.resolve_attribute(kind, &name)?;
            store.move_attribute(kind, attr.id, position)?;
        }
        AttributeAction::Completes { name, off } => {
            if kind != AttributeKind::Status {
                bail!("only statuses can mark tasks complete");
            }
            let attr = store.resolve_attribute(kind, &name)?;
            store.set_marks_complete(attr.id, !off)?;
        }
        AttributeAction::Rm { name } => {
            let attr = store.resolve_attribute(kind, &name)?;
            let touched = store.delete_attribute(kind, attr.id)?;
            eprintln!("Deleted {kind} '{}', re-pointed {} task(s)", attr.name, touched.len());
        }
    }
    Ok(())
}
