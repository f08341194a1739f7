//! Interview content: problems, reference solutions, assessment criteria,
//! and the prose sent to the model as instructions and context turns.

#[derive(Debug, Clone)]
pub struct Criterion {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Solution {
    pub rank: u32,
    pub title: String,
    pub approach: String,
    pub time_complexity: String,
    pub space_complexity: String,
    pub code: String,
    pub edge_cases: String,
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub difficulty: String,
    pub description: String,
    pub solutions: Vec<Solution>,
    pub criteria: Vec<Criterion>,
}

impl Problem {
    pub fn criteria_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.criteria
            .iter()
            .map(|c| (c.id.clone(), c.description.clone()))
    }
}

/// System-instruction paragraphs declared in the setup frame.
pub fn system_instruction() -> Vec<String> {
    vec![
        "You are an expert coding interviewer conducting a live coding session. \
         Please greet the candidate warmly as soon as possible, and don't wait for \
         them to speak first."
            .to_string(),
        "Initially, you don't know which problem the candidate will work on, so \
         don't assume any specific problem. You can see the candidate's screen as \
         they code, and your primary role is to provide guidance and encouragement. \
         Your approach should be supportive and educational, helping them understand \
         the requirements better. Regularly ask them about their thought process with \
         questions like 'Why did you choose this approach?' or 'Have you considered \
         these edge cases?' to deepen their understanding. Be supportive, offer \
         timely hints, and create a positive learning environment. If a new problem \
         is selected, completely forget any previous problems and focus only on the \
         current one."
            .to_string(),
        "Your primary task is to watch the candidate's screen and evaluate them \
         against an independent checklist of criteria. Each criterion is separate, \
         with no dependency between them. For every criterion, the moment you are at \
         least 70% confident it is satisfied, you must call the tool \
         `markCriteriaSatisfied` with the criteriaId, your confidence (0.5 to 1.0), \
         notes describing the on-screen evidence, and the current ISO-8601 UTC \
         timestamp. Confidence is based on comparing the criterion description with \
         what the user is doing on screen; visual evidence alone is enough, you do \
         not have to ask the candidate to confirm. You may call the tool many times \
         (one call per criterion) and you must not wait until other criteria are met."
            .to_string(),
    ]
}

/// Opening turn sent right after the setup frame.
pub fn greeting() -> String {
    "Please greet the candidate warmly as soon as possible, and don't wait for them \
     to speak first. You should ask them to open their code editor, and wait until \
     you see their code editor open."
        .to_string()
}

/// Subject text for a new-problem context directive.
pub fn problem_subject(problem: &Problem) -> String {
    format!(
        "**Title**: {}\n\n**Problem Description**:\n{}\n",
        problem.title, problem.description
    )
}

/// Detail text carrying the reference solutions and hinting instructions.
pub fn solution_details(problem: &Problem) -> String {
    let formatted: Vec<String> = problem
        .solutions
        .iter()
        .map(|sol| {
            format!(
                "**Solution {}: {}**\n\n\
                 Approach: {}\n\n\
                 Time Complexity: {}\n\
                 Space Complexity: {}\n\n\
                 Implementation:\n```\n{}\n```\n\n\
                 Edge Cases: {}",
                sol.rank,
                sol.title,
                sol.approach,
                sol.time_complexity,
                sol.space_complexity,
                sol.code,
                sol.edge_cases
            )
        })
        .collect();

    format!(
        "I have solutions available for \"{}\" (Problem ID: {})\n\n\
         I'll be monitoring the candidate's work and can provide appropriate hints \
         as needed. When they begin working on this problem, I should say: \"Hi, \
         I'm here to help. Would you like me to provide any hints if you get \
         stuck?\"\n\n\
         **Problem**: {}\n\n\
         **Available Solutions**:\n{}\n\n\
         **Instructions for Giving Hints**:\n\
         1. Observe the candidate's approach and match it to the closest solution above.\n\
         2. If their approach is similar to one of the solutions (even partially), use THAT solution as the basis for your hints.\n\
         3. If their approach doesn't match any solution OR they're struggling to start, guide them toward Solution 1 (the simplest approach).\n\
         4. Start with subtle hints before giving more detailed guidance.\n\
         5. Interact conversationally as an interview expert, not as if you're reading from a solution manual.\n\
         6. When the candidate meets any of the assessment criteria, use the markCriteriaSatisfied tool with the corresponding criteria ID.\n",
        problem.title,
        problem.id,
        problem.title,
        formatted.join("\n\n---\n\n")
    )
}

/// Checklist turns: one announcement, then one turn per criterion so each
/// can be tracked independently.
pub fn criteria_turns(problem: &Problem) -> Vec<String> {
    let mut turns = Vec::with_capacity(problem.criteria.len() + 1);
    turns.push(format!(
        "We are evaluating the candidate on \"{}\" (Problem ID {}).\n\n\
         You have a checklist of {} independent criteria, sent one per turn. For \
         each criterion, as soon as you are at least 70% confident it is satisfied \
         based on on-screen evidence, immediately call markCriteriaSatisfied with \
         its criteriaId.",
        problem.title,
        problem.id,
        problem.criteria.len()
    ));
    for criterion in &problem.criteria {
        turns.push(format!(
            "Criterion `{}`: {}",
            criterion.id, criterion.description
        ));
    }
    turns
}

/// Problems bundled with the binary; selected by title on the command line.
pub fn built_in_problems() -> Vec<Problem> {
    vec![
        Problem {
            id: "two-sum".to_string(),
            title: "Two Sum".to_string(),
            difficulty: "Easy".to_string(),
            description: "Given an array of integers nums and an integer target, return \
                          indices of the two numbers such that they add up to target. You \
                          may assume that each input has exactly one solution, and you may \
                          not use the same element twice."
                .to_string(),
            solutions: vec![
                Solution {
                    rank: 1,
                    title: "Brute Force".to_string(),
                    approach: "Check every pair of indices and return the pair whose values \
                               sum to the target."
                        .to_string(),
                    time_complexity: "O(n^2)".to_string(),
                    space_complexity: "O(1)".to_string(),
                    code: "def two_sum(nums, target):\n    for i in range(len(nums)):\n        for j in range(i + 1, len(nums)):\n            if nums[i] + nums[j] == target:\n                return [i, j]"
                        .to_string(),
                    edge_cases: "Duplicate values that sum to the target; negative numbers."
                        .to_string(),
                },
                Solution {
                    rank: 2,
                    title: "One-Pass Hash Map".to_string(),
                    approach: "Walk the array once, storing each value's index in a map and \
                               checking whether the complement was already seen."
                        .to_string(),
                    time_complexity: "O(n)".to_string(),
                    space_complexity: "O(n)".to_string(),
                    code: "def two_sum(nums, target):\n    seen = {}\n    for i, n in enumerate(nums):\n        if target - n in seen:\n            return [seen[target - n], i]\n        seen[n] = i"
                        .to_string(),
                    edge_cases: "The complement equals the current value; target reached \
                                 with the first two elements."
                        .to_string(),
                },
            ],
            criteria: vec![
                Criterion {
                    id: "twoSumReadProblem".to_string(),
                    description: "The candidate reads the problem statement and restates \
                                  it in their own words."
                        .to_string(),
                },
                Criterion {
                    id: "twoSumHashMap".to_string(),
                    description: "The candidate uses a hash map (or equivalent) to find \
                                  complements in a single pass."
                        .to_string(),
                },
                Criterion {
                    id: "twoSumComplexity".to_string(),
                    description: "The candidate states the time and space complexity of \
                                  their solution."
                        .to_string(),
                },
            ],
        },
        Problem {
            id: "valid-parentheses".to_string(),
            title: "Valid Parentheses".to_string(),
            difficulty: "Easy".to_string(),
            description: "Given a string containing just the characters '(', ')', '{', \
                          '}', '[' and ']', determine if the input string is valid. \
                          Brackets must close in the correct order."
                .to_string(),
            solutions: vec![Solution {
                rank: 1,
                title: "Stack".to_string(),
                approach: "Push opening brackets onto a stack; on a closing bracket, pop \
                           and check that it matches."
                    .to_string(),
                time_complexity: "O(n)".to_string(),
                space_complexity: "O(n)".to_string(),
                code: "def is_valid(s):\n    pairs = {')': '(', ']': '[', '}': '{'}\n    stack = []\n    for ch in s:\n        if ch in pairs:\n            if not stack or stack.pop() != pairs[ch]:\n                return False\n        else:\n            stack.append(ch)\n    return not stack"
                    .to_string(),
                edge_cases: "Empty string; a single closing bracket; unclosed opener at \
                             the end."
                    .to_string(),
            }],
            criteria: vec![
                Criterion {
                    id: "parensStack".to_string(),
                    description: "The candidate uses a stack to track open brackets."
                        .to_string(),
                },
                Criterion {
                    id: "parensEdgeCases".to_string(),
                    description: "The candidate handles the empty string and a leading \
                                  closing bracket."
                        .to_string(),
                },
            ],
        },
    ]
}

/// Picks a problem by case-insensitive title, falling back to the first
/// bundled one.
pub fn select_problem(title: Option<&str>) -> Problem {
    let problems = built_in_problems();
    match title {
        Some(wanted) => problems
            .iter()
            .find(|p| p.title.eq_ignore_ascii_case(wanted))
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!(title = %wanted, "unknown problem title; using the default");
                problems[0].clone()
            }),
        None => problems[0].clone(),
    }
}
