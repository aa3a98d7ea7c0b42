//! Long random operation sequences against the store. After every step the
//! in-memory forest must satisfy its invariants, and at the end it must match
//! what is on disk.

use tasktree::config::Config;
use tasktree::{Error, NewTask, TaskEdit, TaskId, TaskStore};

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

fn pick(rng: &mut Lcg, store: &TaskStore) -> Option<TaskId> {
    let mut ids: Vec<TaskId> = store.tree().iter().map(|t| t.id).collect();
    if ids.is_empty() {
        return None;
    }
    ids.sort();
    Some(ids[rng.below(ids.len())])
}

fn pick_parent(rng: &mut Lcg, store: &TaskStore) -> Option<TaskId> {
    if rng.below(4) == 0 {
        None
    } else {
        pick(rng, store)
    }
}

fn run_sequence(seed: u64, steps: usize) {
    let mut store = TaskStore::open_in_memory(Config::default()).unwrap();
    let mut rng = Lcg(seed);

    for step in 0..steps {
        let before = store.tree().clone();
        let result = match rng.below(10) {
            0..=3 => {
                let mut new = NewTask::titled(format!("t{step}"));
                new.parent = pick_parent(&mut rng, &store);
                if rng.below(2) == 0 {
                    new.position = Some(rng.below(5));
                }
                store.create_task(new).map(|_| ())
            }
            4..=6 => match pick(&mut rng, &store) {
                Some(id) => {
                    let parent = pick_parent(&mut rng, &store);
                    let position = rng.below(6);
                    store.move_task(id, parent, position)
                }
                None => Ok(()),
            },
            7 => match pick(&mut rng, &store) {
                Some(id) => {
                    let cascade = rng.below(2) == 0;
                    store.remove_task(id, cascade).map(|_| ())
                }
                None => Ok(()),
            },
            _ => match pick(&mut rng, &store) {
                Some(id) => store.edit_task(
                    id,
                    TaskEdit {
                        title: Some(format!("edited {step}")),
                        ..TaskEdit::default()
                    },
                ),
                None => Ok(()),
            },
        };

        match result {
            Ok(()) => {}
            Err(Error::CycleDetected { .. }) => {
                assert_eq!(store.tree(), &before, "seed {seed} step {step}: tree changed on cycle");
            }
            Err(other) => panic!("seed {seed} step {step}: unexpected {other:?}"),
        }
        if let Err(msg) = store.tree().check_invariants() {
            panic!("seed {seed} step {step}: {msg}");
        }
    }

    let on_disk = store.repository().load_tree().unwrap();
    assert_eq!(&on_disk, store.tree(), "seed {seed}: disk and memory diverged");
}

#[test]
fn random_sequences_keep_invariants() {
    for seed in [1, 7, 42, 1234, 98765] {
        run_sequence(seed, 300);
    }
}

#[test]
fn moving_into_own_subtree_never_succeeds() {
    let mut store = TaskStore::open_in_memory(Config::default()).unwrap();
    let mut chain = vec![store.create_task(NewTask::titled("0")).unwrap()];
    for i in 1..6 {
        let parent = *chain.last().unwrap();
        chain.push(store.create_task(NewTask::titled(i.to_string()).under(parent)).unwrap());
    }
    for (i, ancestor) in chain.iter().enumerate() {
        for descendant in &chain[i..] {
            let err = store.move_task(*ancestor, Some(*descendant), 0).unwrap_err();
            assert!(matches!(err, Error::CycleDetected { .. }), "{err:?}");
        }
    }
    store.tree().check_invariants().unwrap();
}
