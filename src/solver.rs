use crate::data::{
    AssignmentInput, AssignmentOutput, SessionId, Slot, StudentId, StudentSchedule, Subject,
};
use good_lp::variable;
use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable, constraint,
    default_solver,
};
use itertools::Itertools;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use thiserror::Error;

/// Read-back tolerance for binary variables; anything further from 0 or 1
/// violates the MILP contract.
const BINARY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SolveError {
    #[error(
        "student {student:?} has no preference rank for subject {subject:?}; \
         preference data must cover every catalogued subject"
    )]
    MissingPreference {
        student: StudentId,
        subject: Subject,
    },
    #[error("model is unbounded; check the catalog for negative data")]
    Unbounded,
    #[error("solver returned fractional value {value} for x[{student}][{session}]")]
    FractionalValue {
        student: StudentId,
        session: SessionId,
        value: f64,
    },
    #[error("solver failure: {0}")]
    Solver(String),
}

/// Outcome of a solve. Infeasibility is a legitimate answer (the hard
/// constraints admit no assignment), kept separate from solver failures.
#[derive(Debug)]
pub enum SolveOutcome {
    Optimal(AssignmentOutput),
    Infeasible,
}

/// Builds the binary assignment model and solves it with the HiGHs ILP solver.
///
/// One binary variable per (student, session) pair; the objective minimizes
/// the summed preference rank of assigned sessions, keyed by the subject each
/// session offers. Hard constraints: session capacity, exact hours per
/// student, at most one session per occupied time slot, and at most one
/// session per subject.
pub fn solve(input: &AssignmentInput) -> Result<SolveOutcome, SolveError> {
    let start_time = Instant::now();

    // model setup
    info!(
        "Setting up ILP model with {} students, {} sessions, and {} decision variables...",
        input.students.len(),
        input.sessions.len(),
        input.students.len() * input.sessions.len()
    );
    let mut problem = ProblemVariables::new();

    // x[s][c] = 1 if student s is assigned to session c
    //           0 otherwise
    let mut x: BTreeMap<(&StudentId, &SessionId), Variable> = BTreeMap::new();
    for student in input.students.keys() {
        for session in input.sessions.keys() {
            x.insert((student, session), problem.add(variable().binary()));
        }
    }

    // objective: minimize total preference rank of the assigned sessions.
    // Preferences are keyed by subject, so every session of a subject costs
    // that subject's rank; a missing rank is a data-integrity error, never a
    // default cost.
    let mut objective = Expression::from(0.0);
    for ((student, session), var) in &x {
        let subject = &input.sessions[*session].subject;
        let rank = input.students[*student].get(subject).copied().ok_or_else(|| {
            SolveError::MissingPreference {
                student: (*student).clone(),
                subject: subject.clone(),
            }
        })?;
        objective += f64::from(rank) * *var;
    }

    let mut model = problem
        .minimise(objective)
        .using(default_solver)
        .set_option("threads", 1) // limit to 1 thread for reproducibility
        .set_option("random_seed", 1234) //set seed for reproducibility
        .set_option("log_to_console", "false");

    // begin hard constraints

    // session capacity must not be exceeded
    info!("Adding capacity constraints...");
    for (session, details) in &input.sessions {
        let enrolled: Expression = input.students.keys().map(|s| x[&(s, session)]).sum();
        model.add_constraint(constraint!(enrolled <= f64::from(details.capacity)));
    }

    // each student is assigned exactly the required hours; an equality, so
    // session durations must tile the target or the model goes infeasible
    info!(
        "Adding exact-hours constraints ({} hours per student)...",
        input.required_hours
    );
    for student in input.students.keys() {
        let hours: Expression = input
            .sessions
            .iter()
            .map(|(session, details)| f64::from(details.duration) * x[&(student, session)])
            .sum();
        model.add_constraint(constraint!(hours == f64::from(input.required_hours)));
    }

    // no time slot conflicts: invert session -> slots into slot -> sessions,
    // then allow at most one of the sessions sharing a slot per student.
    // Slots held by a single session cannot conflict and get no constraint.
    let slot_sessions: HashMap<Slot, Vec<&SessionId>> = input
        .sessions
        .iter()
        .flat_map(|(id, session)| session.slots().map(move |slot| (slot, id)))
        .into_group_map();
    let contested: Vec<(Slot, Vec<&SessionId>)> = slot_sessions
        .into_iter()
        .filter(|(_, sessions)| sessions.len() > 1)
        .sorted()
        .collect();
    info!("Adding slot-overlap constraints...");
    debug!("{} slots are contested by more than one session", contested.len());
    for student in input.students.keys() {
        for (_, sessions) in &contested {
            let occupied: Expression = sessions.iter().map(|id| x[&(student, *id)]).sum();
            model.add_constraint(constraint!(occupied <= 1));
        }
    }

    // at most one session per subject per student, also for subjects with a
    // single offering
    let subject_sessions: Vec<(&Subject, Vec<&SessionId>)> = input
        .sessions
        .iter()
        .map(|(id, session)| (&session.subject, id))
        .into_group_map()
        .into_iter()
        .sorted()
        .collect();
    info!("Adding one-session-per-subject constraints...");
    for student in input.students.keys() {
        for (_, sessions) in &subject_sessions {
            let taken: Expression = sessions.iter().map(|id| x[&(student, *id)]).sum();
            model.add_constraint(constraint!(taken <= 1));
        }
    }

    // solve
    info!("Starting ILP solver...");
    let solution = match model.solve() {
        Ok(s) => s,
        Err(ResolutionError::Infeasible) => {
            info!("Model is infeasible; no assignment satisfies every constraint.");
            return Ok(SolveOutcome::Infeasible);
        }
        Err(ResolutionError::Unbounded) => return Err(SolveError::Unbounded),
        Err(e) => return Err(SolveError::Solver(e.to_string())),
    };
    info!("Solution found in {:.2?}", start_time.elapsed());

    // read the assignment back per student
    let mut schedules = Vec::new();
    for (student, preferences) in &input.students {
        let mut sessions: Vec<SessionId> = Vec::new();
        for session in input.sessions.keys() {
            let value = solution.value(x[&(student, session)]);
            if (value - value.round()).abs() > BINARY_TOLERANCE {
                return Err(SolveError::FractionalValue {
                    student: student.clone(),
                    session: session.clone(),
                    value,
                });
            }
            if value > 0.5 {
                sessions.push(session.clone());
            }
        }
        let subjects: Vec<Subject> = sessions
            .iter()
            .map(|id| input.sessions[id].subject.clone())
            .sorted()
            .dedup()
            .collect();
        let preference_cost = sessions
            .iter()
            .map(|id| preferences[&input.sessions[id].subject])
            .sum();
        let hours = sessions.iter().map(|id| input.sessions[id].duration).sum();
        schedules.push(StudentSchedule {
            student: student.clone(),
            sessions,
            subjects,
            preference_cost,
            hours,
        });
    }

    let total_cost = schedules.iter().map(|s| s.preference_cost).sum();
    Ok(SolveOutcome::Optimal(AssignmentOutput {
        schedules,
        total_cost,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AssignmentInput, Catalog, Hour, Preferences, Rank, Roster, Session};
    use std::collections::{BTreeSet, HashMap};

    fn session(subject: &str, day: &str, start: Hour, duration: Hour, capacity: u32) -> Session {
        Session {
            subject: subject.to_string(),
            day: day.to_string(),
            start,
            duration,
            capacity,
        }
    }

    fn make_input(
        students: &[(&str, &[(&str, Rank)])],
        sessions: &[(&str, Session)],
        required_hours: Hour,
    ) -> AssignmentInput {
        let mut roster = Roster::new();
        for (name, ranks) in students {
            let prefs: Preferences = ranks
                .iter()
                .map(|(subject, rank)| (subject.to_string(), *rank))
                .collect();
            roster.insert(name.to_string(), prefs);
        }
        let catalog: Catalog = sessions
            .iter()
            .map(|(id, s)| (id.to_string(), s.clone()))
            .collect();
        AssignmentInput {
            students: roster,
            sessions: catalog,
            required_hours,
        }
    }

    fn expect_optimal(input: &AssignmentInput) -> AssignmentOutput {
        match solve(input).unwrap() {
            SolveOutcome::Optimal(output) => output,
            SolveOutcome::Infeasible => panic!("expected an optimal assignment"),
        }
    }

    fn expect_infeasible(input: &AssignmentInput) {
        match solve(input).unwrap() {
            SolveOutcome::Optimal(output) => {
                panic!("expected infeasibility, got assignment:\n{output}")
            }
            SolveOutcome::Infeasible => {}
        }
    }

    /// Checks the four feasibility invariants on an extracted assignment.
    fn assert_feasible(input: &AssignmentInput, output: &AssignmentOutput) {
        let mut enrolled: HashMap<&str, u32> = HashMap::new();
        for schedule in &output.schedules {
            // exact hours, not at-most
            assert_eq!(
                schedule.hours, input.required_hours,
                "{} must be scheduled for exactly the required hours",
                schedule.student
            );
            // no two assigned sessions may share a slot
            let mut occupied = BTreeSet::new();
            for id in &schedule.sessions {
                for slot in input.sessions[id].slots() {
                    assert!(
                        occupied.insert(slot.clone()),
                        "{} is double-booked at {:?}",
                        schedule.student,
                        slot
                    );
                }
                *enrolled.entry(id.as_str()).or_default() += 1;
            }
            // at most one session per subject
            let subjects: Vec<&str> = schedule
                .sessions
                .iter()
                .map(|id| input.sessions[id].subject.as_str())
                .collect();
            let distinct: BTreeSet<&str> = subjects.iter().copied().collect();
            assert_eq!(
                distinct.len(),
                subjects.len(),
                "{} takes a subject twice",
                schedule.student
            );
        }
        for (id, count) in enrolled {
            assert!(
                count <= input.sessions[id].capacity,
                "session {id} is over capacity"
            );
        }
    }

    #[test]
    fn assigns_two_compatible_sessions_covering_the_hours() {
        // Scenario A: both sessions fit and tile the required hours exactly.
        let input = make_input(
            &[("Alice", &[("Rap", 1), ("Graffiti", 2)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Mon", 10, 2, 1)),
            ],
            4,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        assert_eq!(output.schedules[0].sessions, vec!["C1", "C2"]);
        assert_eq!(output.schedules[0].preference_cost, 3);
        assert_eq!(output.total_cost, 3);
    }

    #[test]
    fn infeasible_when_durations_cannot_tile_the_required_hours() {
        // Scenario B: available durations sum to 5 or 7, never 6.
        let input = make_input(
            &[("Alice", &[("Rap", 1), ("Graffiti", 2)])],
            &[
                ("C1", session("Rap", "Mon", 8, 5, 1)),
                ("C2", session("Graffiti", "Tue", 8, 7, 1)),
            ],
            6,
        );
        expect_infeasible(&input);
    }

    #[test]
    fn contested_session_goes_to_one_student_only() {
        // Scenario C: one seat in the top-ranked session; the other student
        // falls back to the alternative.
        let input = make_input(
            &[
                ("Alice", &[("Rap", 1), ("Graffiti", 5)]),
                ("Bob", &[("Rap", 1), ("Graffiti", 5)]),
            ],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Tue", 8, 2, 1)),
            ],
            2,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        // one of them pays the fallback rank
        assert_eq!(output.total_cost, 6);
    }

    #[test]
    fn infeasible_when_the_contested_seat_has_no_alternative() {
        let input = make_input(
            &[
                ("Alice", &[("Rap", 1)]),
                ("Bob", &[("Rap", 1)]),
            ],
            &[("C1", session("Rap", "Mon", 8, 2, 1))],
            2,
        );
        expect_infeasible(&input);
    }

    #[test]
    fn same_subject_on_two_days_yields_a_single_assignment() {
        // Scenario D: schedule-compatible duplicates of one subject.
        let input = make_input(
            &[("Alice", &[("Rap", 1)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Rap", "Tue", 8, 2, 1)),
            ],
            2,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        assert_eq!(output.schedules[0].sessions.len(), 1);
        assert_eq!(output.schedules[0].subjects, vec!["Rap"]);
    }

    #[test]
    fn subject_constraint_blocks_duplicate_even_when_hours_demand_it() {
        // Both offerings together would tile the hours, but one subject may
        // only be taken once.
        let input = make_input(
            &[("Alice", &[("Rap", 1)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Rap", "Tue", 8, 2, 1)),
            ],
            4,
        );
        expect_infeasible(&input);
    }

    #[test]
    fn picks_the_cheapest_rank_combination() {
        // Scenario E: four non-overlapping two-hour sessions, ranks 1..4;
        // the optimum takes ranks 1 and 2.
        let input = make_input(
            &[(
                "Alice",
                &[("Rap", 1), ("Graffiti", 2), ("Beatz", 3), ("Ultimate", 4)],
            )],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Mon", 10, 2, 1)),
                ("C3", session("Beatz", "Tue", 8, 2, 1)),
                ("C4", session("Ultimate", "Tue", 10, 2, 1)),
            ],
            4,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        assert_eq!(output.total_cost, 3);
        assert_eq!(output.schedules[0].sessions, vec!["C1", "C2"]);
    }

    #[test]
    fn overlapping_sessions_are_never_both_assigned() {
        // C1 (Mon 8-10) and C2 (Mon 9-11) collide at Mon 9; the only
        // four-hour schedules combine one of them with C3.
        let input = make_input(
            &[("Alice", &[("Rap", 1), ("Graffiti", 2), ("Beatz", 3)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Mon", 9, 2, 1)),
                ("C3", session("Beatz", "Tue", 8, 2, 1)),
            ],
            4,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        assert_eq!(output.schedules[0].sessions, vec!["C1", "C3"]);
        assert_eq!(output.total_cost, 4);
    }

    #[test]
    fn capacity_spreads_students_across_offerings() {
        let input = make_input(
            &[
                ("Alice", &[("Rap", 1), ("Graffiti", 2)]),
                ("Bob", &[("Rap", 1), ("Graffiti", 2)]),
                ("Carol", &[("Rap", 1), ("Graffiti", 2)]),
            ],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 2)),
                ("C2", session("Graffiti", "Mon", 8, 2, 2)),
            ],
            2,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        // two students fit the preferred session, the third moves over
        assert_eq!(output.total_cost, 4);
    }

    #[test]
    fn repeated_solves_reach_the_same_objective() {
        let input = make_input(
            &[
                ("Alice", &[("Rap", 1), ("Graffiti", 2), ("Beatz", 3)]),
                ("Bob", &[("Rap", 2), ("Graffiti", 1), ("Beatz", 3)]),
            ],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Mon", 8, 2, 1)),
                ("C3", session("Beatz", "Tue", 8, 2, 2)),
            ],
            4,
        );
        let first = expect_optimal(&input);
        let second = expect_optimal(&input);
        assert_eq!(first.total_cost, second.total_cost);
    }

    #[test]
    fn missing_rank_for_a_catalogued_subject_fails_fast() {
        let input = make_input(
            &[("Alice", &[("Rap", 1)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 1)),
                ("C2", session("Graffiti", "Tue", 8, 2, 1)),
            ],
            2,
        );
        match solve(&input) {
            Err(SolveError::MissingPreference { student, subject }) => {
                assert_eq!(student, "Alice");
                assert_eq!(subject, "Graffiti");
            }
            other => panic!("expected a missing-preference error, got {other:?}"),
        }
    }

    #[test]
    fn zero_capacity_session_stays_empty() {
        let input = make_input(
            &[("Alice", &[("Rap", 1), ("Graffiti", 2)])],
            &[
                ("C1", session("Rap", "Mon", 8, 2, 0)),
                ("C2", session("Graffiti", "Tue", 8, 2, 1)),
            ],
            2,
        );
        let output = expect_optimal(&input);
        assert_feasible(&input, &output);
        assert_eq!(output.schedules[0].sessions, vec!["C2"]);
    }
}
