use std::fmt;

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Tree<A> {
    pub root: A,
    pub children: Vec<Tree<A>>,
}

impl<A> Tree<A> {
    pub fn leaf(root: A) -> Self {
        Tree {
            root,
            children: vec![],
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn leaves(&self) -> Vec<&A> {
        if self.is_leaf() {
            vec![&self.root]
        } else {
            self.children
                .iter()
                .map(|c| c.leaves())
                .fold(vec![], |mut acc, mut x| {
                    acc.append(&mut x);
                    acc
                })
        }
    }
}

impl<A: fmt::Display> fmt::Display for Tree<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf() {
            write!(f, "{}", self.root)
        } else {
            write!(f, "({}", self.root)?;
            for child in &self.children {
                write!(f, " {}", child)?;
            }
            write!(f, ")")
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum NodeType<N, T> {
    Terminal(T),
    NonTerminal(N),
}

impl<N: fmt::Display, T: fmt::Display> fmt::Display for NodeType<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Terminal(t) => t.fmt(f),
            NodeType::NonTerminal(n) => n.fmt(f),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn example() -> Tree<NodeType<&'static str, &'static str>> {
        Tree {
            root: NodeType::NonTerminal("NP"),
            children: vec![
                Tree {
                    root: NodeType::NonTerminal("D"),
                    children: vec![Tree::leaf(NodeType::Terminal("the"))],
                },
                Tree {
                    root: NodeType::NonTerminal("N"),
                    children: vec![Tree::leaf(NodeType::Terminal("ball"))],
                },
            ],
        }
    }

    #[test]
    fn display_as_sexp() {
        assert_eq!("(NP (D the) (N ball))", format!("{}", example()));
        assert_eq!("a", format!("{}", Tree::leaf("a")));
    }

    #[test]
    fn get_leaves() {
        let tree = example();
        let leaves: Vec<_> = tree.leaves().into_iter().map(|l| l.to_string()).collect();
        assert_eq!(leaves, vec!["the", "ball"]);
    }
}
