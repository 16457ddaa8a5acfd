use rayon::prelude::*;

use crate::portfolio::Individual;

/// Partitions the population into fronts F0, F1, ... (indices into
/// `population`) using constraint-domination.
///
/// This is Deb's fast non-dominated sort: O(M N^2) comparisons, done in
/// parallel per individual since every row only writes its own slot.
pub fn fast_non_dominated_sort(population: &[Individual]) -> Vec<Vec<usize>> {
    if population.is_empty() {
        return vec![];
    }

    // For every individual: who it dominates, and by how many it is dominated
    let relations: Vec<(Vec<usize>, usize)> = population
        .par_iter()
        .enumerate()
        .map(|(i, individual_a)| {
            let mut dominated = Vec::new();
            let mut domination_count = 0;
            for (j, individual_b) in population.iter().enumerate() {
                if i == j {
                    continue;
                }
                if individual_a.constrained_dominates(individual_b) {
                    dominated.push(j);
                } else if individual_b.constrained_dominates(individual_a) {
                    domination_count += 1;
                }
            }
            (dominated, domination_count)
        })
        .collect();

    let mut domination_counts: Vec<usize> = relations.iter().map(|(_, count)| *count).collect();
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut current_front: Vec<usize> = (0..population.len())
        .filter(|&i| domination_counts[i] == 0)
        .collect();

    while !current_front.is_empty() {
        let mut next_front = Vec::new();
        for &i in current_front.iter() {
            for &j in relations[i].0.iter() {
                domination_counts[j] -= 1;
                if domination_counts[j] == 0 {
                    next_front.push(j);
                }
            }
        }
        next_front.sort_unstable();
        fronts.push(current_front);
        current_front = next_front;
    }

    fronts
}

/// Crowding distance of every member of `front`, written into the individuals.
///
/// Boundary individuals along each objective get an infinite distance so they
/// always survive; interior ones accumulate the normalized gap between their
/// neighbours.
pub fn calculate_and_update_crowding_distance(population: &mut [Individual], front: &[usize]) {
    for &i in front {
        population[i].crowding_distance = Some(0.0);
    }
    if front.len() <= 2 {
        for &i in front {
            population[i].crowding_distance = Some(f64::INFINITY);
        }
        return;
    }

    let number_of_objectives = population[front[0]].objectives.len();
    for objective_idx in 0..number_of_objectives {
        // sort with respect to current objective
        let mut sorted = front.to_vec();
        sorted.sort_by(|&a, &b| {
            let value_a = population[a].objectives[objective_idx];
            let value_b = population[b].objectives[objective_idx];
            value_a.total_cmp(&value_b)
        });

        let last_index = sorted.len() - 1;
        population[sorted[0]].crowding_distance = Some(f64::INFINITY);
        population[sorted[last_index]].crowding_distance = Some(f64::INFINITY);

        let min_value = population[sorted[0]].objectives[objective_idx];
        let max_value = population[sorted[last_index]].objectives[objective_idx];
        let range = max_value - min_value;
        if !(range.is_finite() && range > 0.0) {
            continue;
        }

        for position in 1..last_index {
            let previous = population[sorted[position - 1]].objectives[objective_idx];
            let next = population[sorted[position + 1]].objectives[objective_idx];
            let current = &mut population[sorted[position]];
            let current_distance = current.crowding_distance.unwrap_or(0.0);
            current.crowding_distance = Some(current_distance + (next - previous) / range);
        }
    }
}

/// Ranks the whole population in place and returns its fronts.
pub fn build_pareto_fronts(population: &mut [Individual]) -> Vec<Vec<usize>> {
    let fronts = fast_non_dominated_sort(population);
    for (rank, front) in fronts.iter().enumerate() {
        for &i in front {
            population[i].rank = Some(rank);
        }
        calculate_and_update_crowding_distance(population, front);
    }
    fronts
}

/// Elitist survival: whole fronts in rank order, then the overflowing front by
/// descending crowding distance.
pub fn environmental_selection(
    mut population: Vec<Individual>,
    target_size: usize,
) -> Vec<Individual> {
    let fronts = build_pareto_fronts(&mut population);
    let mut survivors: Vec<usize> = Vec::with_capacity(target_size);

    for front in fronts.iter() {
        if survivors.len() >= target_size {
            break;
        }
        if survivors.len() + front.len() <= target_size {
            survivors.extend(front.iter().copied());
        } else {
            let needed = target_size - survivors.len();
            let mut sorted_partial_front = front.clone();
            // Stable sort, so equal distances keep their index order. Inf first.
            sorted_partial_front.sort_by(|&a, &b| {
                let distance_a = population[a].crowding_distance.unwrap_or(f64::NEG_INFINITY);
                let distance_b = population[b].crowding_distance.unwrap_or(f64::NEG_INFINITY);
                distance_b.total_cmp(&distance_a)
            });
            survivors.extend(sorted_partial_front.into_iter().take(needed));
            break;
        }
    }

    survivors.sort_unstable();
    let mut keep = vec![false; population.len()];
    for &i in survivors.iter() {
        keep[i] = true;
    }
    population
        .into_iter()
        .zip(keep)
        .filter_map(|(individual, kept)| kept.then_some(individual))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_individual(id: usize, risk: f64, negative_return: f64) -> Individual {
        Individual::new(id, vec![0.5, 0.5], vec![risk, negative_return], 0.0, 1e-6)
    }

    fn infeasible(id: usize, risk: f64, negative_return: f64, residual: f64) -> Individual {
        Individual::new(id, vec![0.5, 0.5], vec![risk, negative_return], residual, 1e-6)
    }

    #[test]
    fn test_empty_population() {
        assert!(fast_non_dominated_sort(&[]).is_empty());
    }

    #[test]
    fn test_fronts_are_ordered() {
        let population = vec![
            create_individual(0, 0.10, -0.05), // F0
            create_individual(1, 0.20, -0.04), // dominated by 0 -> F1
            create_individual(2, 0.05, -0.01), // F0
            create_individual(3, 0.30, -0.03), // dominated by 0 and 1 -> F2
            create_individual(4, 0.25, -0.10), // F0
        ];
        let fronts = fast_non_dominated_sort(&population);
        assert_eq!(fronts, vec![vec![0, 2, 4], vec![1], vec![3]]);
    }

    #[test]
    fn test_infeasible_individuals_rank_after_feasible() {
        let population = vec![
            infeasible(0, 0.01, -0.50, 0.3),
            create_individual(1, 0.90, -0.01),
            infeasible(2, 0.01, -0.50, 0.1),
        ];
        let fronts = fast_non_dominated_sort(&population);
        assert_eq!(fronts, vec![vec![1], vec![2], vec![0]]);
    }

    #[test]
    fn test_first_front_is_mutually_non_dominated() {
        let population: Vec<Individual> = (0..30)
            .map(|i| {
                let x = i as f64 / 29.0;
                // a convex front plus some noise points above it
                let offset = if i % 3 == 0 { 0.05 } else { 0.0 };
                create_individual(i, x * x + offset, -x + offset)
            })
            .collect();
        let fronts = fast_non_dominated_sort(&population);
        let front = &fronts[0];
        for &a in front {
            for &b in front {
                assert!(!population[a].constrained_dominates(&population[b]));
            }
        }
        assert_eq!(
            fronts.iter().map(|f| f.len()).sum::<usize>(),
            population.len()
        );
    }

    #[test]
    fn test_crowding_distance_boundaries_are_infinite() {
        let mut population = vec![
            create_individual(0, 0.1, -0.1),
            create_individual(1, 0.2, -0.2),
            create_individual(2, 0.4, -0.3),
            create_individual(3, 0.5, -0.5),
        ];
        let front = vec![0, 1, 2, 3];
        calculate_and_update_crowding_distance(&mut population, &front);

        assert_eq!(population[0].crowding_distance, Some(f64::INFINITY));
        assert_eq!(population[3].crowding_distance, Some(f64::INFINITY));
        // individual 1: (0.4 - 0.1) / 0.4 + (0.3 - 0.1) / 0.4
        let expected = 0.3 / 0.4 + 0.2 / 0.4;
        assert!((population[1].crowding_distance.unwrap() - expected).abs() < 1e-12);
        assert!(population[2].crowding_distance.unwrap().is_finite());
    }

    #[test]
    fn test_small_fronts_are_all_boundaries() {
        let mut population = vec![create_individual(0, 0.1, -0.1), create_individual(1, 0.2, -0.3)];
        calculate_and_update_crowding_distance(&mut population, &[0, 1]);
        assert!(population
            .iter()
            .all(|p| p.crowding_distance == Some(f64::INFINITY)));
    }

    #[test]
    fn test_environmental_selection_keeps_best_fronts() {
        let population = vec![
            create_individual(0, 0.30, -0.01), // F1 (dominated by 4)
            create_individual(1, 0.05, -0.01), // F0 extreme
            create_individual(2, 0.10, -0.05), // F0
            create_individual(3, 0.15, -0.08), // F0
            create_individual(4, 0.20, -0.12), // F0 extreme
            create_individual(5, 0.50, -0.02), // F1
        ];
        let survivors = environmental_selection(population, 3);
        let ids: Vec<usize> = survivors.iter().map(|p| p.id).collect();

        assert_eq!(survivors.len(), 3);
        // both extremes have infinite distance and must survive
        assert!(ids.contains(&1));
        assert!(ids.contains(&4));
        assert!(survivors.iter().all(|p| p.rank == Some(0)));
    }

    #[test]
    fn test_environmental_selection_whole_fronts() {
        let population = vec![
            create_individual(0, 0.30, -0.01),
            create_individual(1, 0.05, -0.01),
            create_individual(2, 0.20, -0.12),
            create_individual(3, 0.50, -0.02),
        ];
        let survivors = environmental_selection(population, 3);
        let ids: Vec<usize> = survivors.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
