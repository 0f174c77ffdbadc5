use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkovError {
    #[error("Discrete trajectory shorter than the lag ({lag} steps)")]
    TrajectoryTooShort { lag: usize },
    #[error("Transition matrix row {0} has zero total weight")]
    ZeroRow(usize),
    #[error("First-passage system is singular (no path into the target set)")]
    SingularSystem,
    #[error("Origin set has zero stationary weight")]
    ZeroOriginWeight,
    #[error("Stationary distribution is undefined (reducible transition matrix)")]
    DegenerateStationary,
}

/// Sliding-window transition counts at the given lag over `n_states` states.
pub fn count_transitions(
    dtrajs: &[Vec<usize>],
    lag: usize,
    n_states: usize,
) -> DMatrix<f64> {
    let mut counts = DMatrix::zeros(n_states, n_states);
    for dtraj in dtrajs {
        if dtraj.len() <= lag {
            continue;
        }
        for t in 0..dtraj.len() - lag {
            counts[(dtraj[t], dtraj[t + lag])] += 1.0;
        }
    }
    counts
}

/// Strongly connected components of the directed transition graph.
///
/// Components are sorted by descending size, ties broken by the smallest
/// member index, and members within each component ascend. The first
/// component is therefore the active set.
pub fn strongly_connected_components(counts: &DMatrix<f64>) -> Vec<Vec<usize>> {
    let n = counts.nrows();
    let adjacency: Vec<Vec<usize>> = (0..n)
        .map(|i| (0..n).filter(|&j| counts[(i, j)] > 0.0).collect())
        .collect();

    // Iterative Tarjan to keep the stack bounded for large cluster counts.
    let mut index = vec![usize::MAX; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut counter = 0usize;

    for root in 0..n {
        if index[root] != usize::MAX {
            continue;
        }
        let mut call_stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(&mut (v, ref mut child)) = call_stack.last_mut() {
            if *child == 0 {
                index[v] = counter;
                lowlink[v] = counter;
                counter += 1;
                stack.push(v);
                on_stack[v] = true;
            }
            if *child < adjacency[v].len() {
                let w = adjacency[v][*child];
                *child += 1;
                if index[w] == usize::MAX {
                    call_stack.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                call_stack.pop();
                if let Some(&(parent, _)) = call_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }

    components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    components
}

/// Reversible maximum-likelihood transition matrix and its stationary
/// distribution from a (restricted) count matrix.
///
/// The symmetrized counts `X = C + Cᵀ` satisfy detailed balance exactly, so
/// the stationary distribution is the normalized row sum of `X`.
pub fn reversible_estimate(
    counts: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DVector<f64>), MarkovError> {
    let n = counts.nrows();
    let symmetrized = counts + counts.transpose();
    let row_sums: Vec<f64> = (0..n).map(|i| symmetrized.row(i).sum()).collect();
    let total: f64 = row_sums.iter().sum();

    let mut transition = DMatrix::zeros(n, n);
    let mut stationary = DVector::zeros(n);
    for i in 0..n {
        if row_sums[i] <= 0.0 {
            return Err(MarkovError::ZeroRow(i));
        }
        stationary[i] = row_sums[i] / total;
        for j in 0..n {
            transition[(i, j)] = symmetrized[(i, j)] / row_sums[i];
        }
    }
    Ok((transition, stationary))
}

/// Stationary distribution of an arbitrary row-stochastic matrix. Used for
/// posterior transition-matrix samples, which are not reversible by
/// construction.
///
/// Solves `(Pᵀ - I)π = 0` with `Σπ = 1` directly: the last equation of the
/// singular system is replaced by the normalization constraint, which makes
/// the system nonsingular whenever the chain is irreducible. Metastable
/// chains have eigenvalue gaps far too small for power iteration, so an
/// iterative scheme is not an option here.
pub fn stationary_distribution(transition: &DMatrix<f64>) -> Result<DVector<f64>, MarkovError> {
    let n = transition.nrows();
    let mut system = transition.transpose() - DMatrix::<f64>::identity(n, n);
    for j in 0..n {
        system[(n - 1, j)] = 1.0;
    }
    let mut rhs = DVector::zeros(n);
    rhs[n - 1] = 1.0;

    let mut pi = system
        .lu()
        .solve(&rhs)
        .ok_or(MarkovError::DegenerateStationary)?;
    // Round-off can leave tiny negative entries on near-reducible chains.
    for value in pi.iter_mut() {
        if !value.is_finite() {
            return Err(MarkovError::DegenerateStationary);
        }
        if *value < 0.0 {
            *value = 0.0;
        }
    }
    let total: f64 = pi.iter().sum();
    if total <= 0.0 {
        return Err(MarkovError::DegenerateStationary);
    }
    pi /= total;
    Ok(pi)
}

/// Mean first passage time from `origin` to `target` (state indices local to
/// the transition matrix), in trajectory frames.
///
/// Solves `(I - P_FF) m = 1` over the complement of the target set and
/// averages over the origin set weighted by the stationary distribution. One
/// transition of the chain corresponds to `lag` trajectory frames.
pub fn mean_first_passage(
    transition: &DMatrix<f64>,
    stationary: &DVector<f64>,
    lag: usize,
    origin: &[usize],
    target: &[usize],
) -> Result<f64, MarkovError> {
    let n = transition.nrows();
    let mut in_target = vec![false; n];
    for &t in target {
        in_target[t] = true;
    }
    let free: Vec<usize> = (0..n).filter(|&i| !in_target[i]).collect();
    let local: Vec<Option<usize>> = {
        let mut map = vec![None; n];
        for (l, &g) in free.iter().enumerate() {
            map[g] = Some(l);
        }
        map
    };

    let mut system = DMatrix::identity(free.len(), free.len());
    for (li, &gi) in free.iter().enumerate() {
        for (lj, &gj) in free.iter().enumerate() {
            system[(li, lj)] -= transition[(gi, gj)];
        }
    }
    let rhs = DVector::from_element(free.len(), 1.0);
    let passage = system
        .lu()
        .solve(&rhs)
        .ok_or(MarkovError::SingularSystem)?;

    let mut weighted = 0.0;
    let mut weight = 0.0;
    for &i in origin {
        let m = match local[i] {
            Some(l) => passage[l],
            None => 0.0, // origin state inside the target set
        };
        weighted += stationary[i] * m;
        weight += stationary[i];
    }
    if weight <= 0.0 {
        return Err(MarkovError::ZeroOriginWeight);
    }
    Ok(lag as f64 * weighted / weight)
}

/// One posterior draw of a transition matrix: each row is sampled from a
/// Dirichlet distribution over its observed counts (Gamma draws, normalized).
/// Zero-count transitions stay zero, preserving the sparsity pattern.
pub fn sample_transition_matrix(
    counts: &DMatrix<f64>,
    rng: &mut impl Rng,
) -> Result<DMatrix<f64>, MarkovError> {
    let n = counts.nrows();
    let mut sampled = DMatrix::zeros(n, n);
    for i in 0..n {
        let mut row_sum = 0.0;
        for j in 0..n {
            let c = counts[(i, j)];
            if c > 0.0 {
                let gamma = Gamma::new(c, 1.0).map_err(|_| MarkovError::ZeroRow(i))?;
                let draw = gamma.sample(rng);
                sampled[(i, j)] = draw;
                row_sum += draw;
            }
        }
        if row_sum <= 0.0 {
            return Err(MarkovError::ZeroRow(i));
        }
        for j in 0..n {
            sampled[(i, j)] /= row_sum;
        }
    }
    Ok(sampled)
}
