use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tasktree::config::Config;
use tasktree::{csv_io, db, AttributeKind, ChangeEvent, ChangeKind, NewTask, TaskId, TaskStore};

fn open(dir: &TempDir) -> TaskStore {
    TaskStore::open(Config::default(), &dir.path().join("tasks.db")).unwrap()
}

fn outline(store: &TaskStore) -> Vec<(usize, String)> {
    store
        .tree()
        .walk()
        .map(|t| (store.tree().depth(t.id), t.title.clone()))
        .collect()
}

#[test]
fn tree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let (a, c) = {
        let mut store = open(&dir);
        let a = store.create_task(NewTask::titled("A")).unwrap();
        store.create_task(NewTask::titled("B").under(a)).unwrap();
        let c = store.create_task(NewTask::titled("C").under(a)).unwrap();
        store.move_task(c, None, 0).unwrap();
        (a, c)
    };

    let store = open(&dir);
    assert_eq!(store.tree().roots(), &[c, a]);
    assert_eq!(
        outline(&store),
        vec![
            (0, "C".to_string()),
            (0, "A".to_string()),
            (1, "B".to_string()),
        ]
    );
    store.tree().check_invariants().unwrap();
}

#[test]
fn reopening_does_not_reapply_migrations() {
    let dir = TempDir::new().unwrap();
    drop(open(&dir));
    let store = open(&dir);
    assert_eq!(
        db::current_version(store.repository().connection()).unwrap(),
        db::latest_version()
    );
    assert_eq!(db::migrate(store.repository().connection()).unwrap(), 0);
    assert_eq!(store.attributes(AttributeKind::Status).unwrap().len(), 5);
}

#[test]
fn load_repairs_gapped_positions() {
    let dir = TempDir::new().unwrap();
    let (a, b) = {
        let mut store = open(&dir);
        let a = store.create_task(NewTask::titled("A")).unwrap();
        let b = store.create_task(NewTask::titled("B")).unwrap();
        store
            .repository()
            .connection()
            .execute("UPDATE tasks SET position = position * 10 + 3", [])
            .unwrap();
        (a, b)
    };

    let store = open(&dir);
    assert_eq!(store.task(a).unwrap().position, 0);
    assert_eq!(store.task(b).unwrap().position, 1);
    let positions: Vec<i64> = store
        .repository()
        .connection()
        .prepare("SELECT position FROM tasks ORDER BY position")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(positions, vec![0, 1]);
}

#[test]
fn csv_round_trip_between_databases() {
    let dir = TempDir::new().unwrap();
    let mut source = open(&dir);
    let garden = source
        .add_attribute(AttributeKind::Category, "Garden", "#00FF00")
        .unwrap();
    let mut new = NewTask::titled("Spring");
    new.category = Some(garden.id);
    let spring = source.create_task(new).unwrap();
    let seeds = source.create_task(NewTask::titled("Buy seeds").under(spring)).unwrap();
    source.create_task(NewTask::titled("Plant").under(spring)).unwrap();
    source.create_task(NewTask::titled("Water").under(seeds)).unwrap();
    source.add_link(seeds, "https://seeds.example", None).unwrap();

    let csv_path = dir.path().join("tasks.csv");
    csv_io::export(&source, std::fs::File::create(&csv_path).unwrap()).unwrap();

    let other = TempDir::new().unwrap();
    let mut target = open(&other);
    let created = csv_io::import(&mut target, std::fs::File::open(&csv_path).unwrap()).unwrap();
    assert_eq!(created.len(), 4);
    assert_eq!(outline(&target), outline(&source));

    let copied = target.task(created[0]).unwrap();
    let category = target
        .attribute(AttributeKind::Category, copied.category.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(category.name, "Garden");
    assert_eq!(target.links(created[1]).unwrap().len(), 1);

    drop(target);
    assert_eq!(outline(&open(&other)).len(), 4);
}

#[test]
fn observers_see_one_event_per_commit() {
    let dir = TempDir::new().unwrap();
    let mut store = open(&dir);
    let seen: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let sub = store.subscribe(move |e: &ChangeEvent| sink.borrow_mut().push(e.clone()));

    let a = store.create_task(NewTask::titled("A")).unwrap();
    let b = store.create_task(NewTask::titled("B").at(0)).unwrap();
    assert!(store.move_task(TaskId(999), None, 0).is_err());
    store.remove_task(b, true).unwrap();
    assert!(store.unsubscribe(sub));
    store.create_task(NewTask::titled("C")).unwrap();

    let kinds: Vec<ChangeKind> = seen.borrow().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::Inserted, ChangeKind::Inserted, ChangeKind::Removed]
    );
    // Inserting B at the front renumbered A.
    assert_eq!(seen.borrow()[1].affected, vec![b, a]);
    let sequences: Vec<u64> = seen.borrow().iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}
